//! Implementation of the `pinbuild build` command.

use std::time::Instant;

use anyhow::Result;

use pinbuild_lib::pipeline::{BuildOptions, BuildOutcome, Pipeline};
use pinbuild_lib::workspace_lock::LockMode;

use super::{CommandContext, runtime};
use crate::output::{format_duration, print_info, print_json, print_path, print_stat, print_success};

pub fn cmd_build(ctx: &CommandContext, force: bool) -> Result<()> {
  let start = Instant::now();
  let (config, _lock) = ctx.prepare(LockMode::Exclusive, "build")?;
  let pipeline = Pipeline::from_config(config);

  let outcome = runtime()?.block_on(pipeline.build(BuildOptions { force }))?;

  if ctx.output.is_json() {
    return print_json(&build_json(&outcome));
  }

  let version = &outcome.stage.marker().pin.version;
  if outcome.compiled {
    print_success(&format!("Built against source {version}"));
  } else {
    print_info(&format!("Build for source {version} is up to date"));
  }
  if outcome.stage.fetched() {
    print_stat("Fetched", &pipeline.config().pin.url);
  }
  print_stat("Artifacts", &outcome.artifacts.len().to_string());
  for artifact in &outcome.artifacts {
    print_path(artifact);
  }
  print_stat("Duration", &format_duration(start.elapsed()));

  Ok(())
}

pub(super) fn build_json(outcome: &BuildOutcome) -> serde_json::Value {
  serde_json::json!({
    "fetched": outcome.stage.fetched(),
    "compiled": outcome.compiled,
    "version": outcome.stage.marker().pin.version,
    "artifacts": outcome.artifacts,
  })
}
