//! Error and result types for the compile / test / clean capabilities.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::shell::ShellError;

/// Errors from the compile capability. Diagnostics are passed through verbatim.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("build command `{cmd}` exited with code {code:?}\n{diagnostics}")]
  Failed {
    cmd: String,
    code: Option<i32>,
    diagnostics: String,
  },

  #[error("build produced no artifact matching {patterns:?} in {dir}")]
  MissingArtifacts { dir: PathBuf, patterns: Vec<String> },

  #[error("failed to record build marker at {path}: {message}")]
  Marker { path: PathBuf, message: String },

  #[error(transparent)]
  Shell(#[from] ShellError),
}

/// The test harness could not be run at all. Failing tests are a [`TestReport`], not an error.
#[derive(Debug, Error)]
pub enum TestError {
  #[error(transparent)]
  Shell(#[from] ShellError),
}

#[derive(Debug, Error)]
pub enum CleanError {
  #[error("failed to remove {path}: {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("clean command `{cmd}` exited with code {code:?}\n{output}")]
  Failed {
    cmd: String,
    code: Option<i32>,
    output: String,
  },

  #[error(transparent)]
  Shell(#[from] ShellError),
}

/// Output of a successful compile.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
  pub log: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestFailure {
  pub name: String,
  pub cause: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "failures", rename_all = "snake_case")]
pub enum TestReport {
  AllPassed,
  Failed(Vec<TestFailure>),
}

impl TestReport {
  pub fn passed(&self) -> bool {
    matches!(self, TestReport::AllPassed)
  }

  pub fn failures(&self) -> &[TestFailure] {
    match self {
      TestReport::AllPassed => &[],
      TestReport::Failed(failures) => failures,
    }
  }
}
