//! Implementation of the `pinbuild fetch` command.

use std::time::Instant;

use anyhow::Result;

use pinbuild_lib::pipeline::{Pipeline, StageOutcome};
use pinbuild_lib::workspace_lock::LockMode;

use super::{CommandContext, runtime};
use crate::output::{format_duration, print_info, print_json, print_stat, print_success, short_digest};

pub fn cmd_fetch(ctx: &CommandContext) -> Result<()> {
  let start = Instant::now();
  let (config, _lock) = ctx.prepare(LockMode::Exclusive, "fetch")?;
  let pipeline = Pipeline::from_config(config);

  let outcome = runtime()?.block_on(pipeline.ensure_staged())?;
  let marker = outcome.marker();
  let src_dir = &pipeline.config().src_dir;

  if ctx.output.is_json() {
    return print_json(&serde_json::json!({
      "fetched": outcome.fetched(),
      "src_dir": src_dir,
      "url": marker.pin.url,
      "version": marker.pin.version,
      "sha256": marker.sha256,
      "entries": marker.entries,
    }));
  }

  match &outcome {
    StageOutcome::AlreadyStaged(_) => {
      print_info(&format!("Source {} already staged", marker.pin.version));
    }
    StageOutcome::Staged(tree) => {
      print_success(&format!("Staged source {}", marker.pin.version));
      print_stat("Entries", &marker.entries.to_string());
      if tree.skipped > 0 {
        print_stat("Stripped", &tree.skipped.to_string());
      }
      print_stat("SHA-256", short_digest(&marker.sha256));
    }
  }
  print_stat("Directory", &src_dir.display().to_string());
  print_stat("Duration", &format_duration(start.elapsed()));

  Ok(())
}
