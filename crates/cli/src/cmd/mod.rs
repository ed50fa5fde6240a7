mod build;
mod clean;
mod fetch;
mod status;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use fetch::cmd_fetch;
pub use status::cmd_status;
pub use test::cmd_test;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;
use tracing::debug;

use pinbuild_lib::config::PipelineConfig;
use pinbuild_lib::workspace_lock::{LockMode, WorkspaceLock};

use crate::output::OutputFormat;

/// Global options shared by every subcommand.
pub struct CommandContext {
  pub project_dir: PathBuf,
  pub config: Option<PathBuf>,
  pub output: OutputFormat,
}

impl CommandContext {
  pub fn load_config(&self) -> Result<PipelineConfig> {
    PipelineConfig::load(&self.project_dir, self.config.as_deref()).context("Failed to load configuration")
  }

  /// Load the configuration and lock its project directory.
  pub fn prepare(&self, mode: LockMode, command: &str) -> Result<(PipelineConfig, WorkspaceLock)> {
    let config = self.load_config()?;
    debug!(project = %config.project_dir.display(), version = %config.pin.version, command, "configuration loaded");
    let lock = WorkspaceLock::acquire(&config.project_dir, mode, command).context("Failed to acquire workspace lock")?;
    Ok((config, lock))
  }
}

pub(crate) fn runtime() -> Result<Runtime> {
  Runtime::new().context("Failed to create async runtime")
}
