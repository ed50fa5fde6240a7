//! Implementation of the `pinbuild clean` command.

use anyhow::Result;

use pinbuild_lib::pipeline::Pipeline;
use pinbuild_lib::workspace_lock::LockMode;

use super::{CommandContext, runtime};
use crate::output::{print_info, print_json, print_path, print_stat, print_success};

pub fn cmd_clean(ctx: &CommandContext) -> Result<()> {
  let (config, _lock) = ctx.prepare(LockMode::Exclusive, "clean")?;
  let pipeline = Pipeline::from_config(config);

  let outcome = runtime()?.block_on(pipeline.clean())?;

  if ctx.output.is_json() {
    return print_json(&outcome);
  }

  if outcome.was_clean() {
    print_info("Nothing to clean");
    return Ok(());
  }

  print_success("Clean complete");
  if outcome.delegated {
    print_stat("Toolchain clean", &pipeline.config().toolchain.clean);
  }
  for artifact in &outcome.removed_artifacts {
    print_path(artifact);
  }
  if outcome.removed_src {
    print_stat("Removed", &pipeline.config().src_dir.display().to_string());
  }
  if outcome.removed_partials > 0 {
    print_stat("Partial extractions", &outcome.removed_partials.to_string());
  }

  Ok(())
}
