//! The compile, test and clean capabilities.
//!
//! The pipeline never talks to a compiler or test harness directly; it goes
//! through the [`Toolchain`] trait. [`CommandToolchain`] is the production
//! implementation and runs the configured shell commands in the project
//! directory.

mod report;
mod types;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;

use tracing::{debug, info};

pub use report::{fallback_failure, parse_failures};
pub use types::{BuildError, CleanError, CompileOutput, TestError, TestFailure, TestReport};

use crate::config::ToolchainConfig;
use crate::shell::{ShellCommand, run_shell};

pub trait Toolchain {
  /// Compile against the staged tree at `source_dir`, writing artifacts into `out_dir`.
  fn compile(&self, source_dir: &Path, out_dir: &Path) -> impl Future<Output = Result<CompileOutput, BuildError>> + Send;

  /// Run the test suite in `dir` and report which tests failed.
  fn run_tests(&self, dir: &Path) -> impl Future<Output = Result<TestReport, TestError>> + Send;

  /// Remove whatever `compile` produced in `dir`.
  fn clean(&self, dir: &Path) -> impl Future<Output = Result<(), CleanError>> + Send;
}

/// Toolchain backed by the configured `build` / `test` / `clean` shell commands.
///
/// Every command runs with the project directory as its working directory and
/// sees `PINBUILD_PROJECT_DIR`; `build` additionally sees `PINBUILD_SRC_DIR`.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
  config: ToolchainConfig,
}

impl CommandToolchain {
  pub fn new(config: ToolchainConfig) -> Self {
    Self { config }
  }

  fn command<'a>(&'a self, cmd: &'a str, cwd: &'a Path, env: BTreeMap<String, String>) -> ShellCommand<'a> {
    let mut env = env;
    env.insert("PINBUILD_PROJECT_DIR".to_string(), cwd.to_string_lossy().into_owned());
    ShellCommand {
      cmd,
      cwd: Some(cwd),
      env,
      stdin: None,
      shell: self.config.shell.as_deref(),
      timeout: self.config.timeout,
    }
  }
}

impl Toolchain for CommandToolchain {
  async fn compile(&self, source_dir: &Path, out_dir: &Path) -> Result<CompileOutput, BuildError> {
    info!(src = %source_dir.display(), out = %out_dir.display(), "compiling extension");

    let mut env = BTreeMap::new();
    env.insert("PINBUILD_SRC_DIR".to_string(), source_dir.to_string_lossy().into_owned());

    let output = run_shell(self.command(&self.config.build, out_dir, env)).await?;
    let log = output.combined();

    if !output.success() {
      return Err(BuildError::Failed {
        cmd: self.config.build.clone(),
        code: output.code,
        diagnostics: log,
      });
    }

    debug!(log = %log, "build output");
    Ok(CompileOutput { log })
  }

  async fn run_tests(&self, dir: &Path) -> Result<TestReport, TestError> {
    info!(dir = %dir.display(), "running tests");

    let output = run_shell(self.command(&self.config.test, dir, BTreeMap::new())).await?;
    let log = output.combined();
    debug!(log = %log, "test output");

    if output.success() {
      return Ok(TestReport::AllPassed);
    }

    let mut failures = parse_failures(&log);
    if failures.is_empty() {
      failures.push(fallback_failure(&self.config.test, output.code, &log));
    }
    Ok(TestReport::Failed(failures))
  }

  async fn clean(&self, dir: &Path) -> Result<(), CleanError> {
    info!(dir = %dir.display(), "cleaning build artifacts");

    let output = run_shell(self.command(&self.config.clean, dir, BTreeMap::new())).await?;
    if !output.success() {
      return Err(CleanError::Failed {
        cmd: self.config.clean.clone(),
        code: output.code,
        output: output.combined(),
      });
    }
    Ok(())
  }
}
