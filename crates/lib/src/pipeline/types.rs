//! Error and outcome types for the pipeline driver.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use super::state::PipelineState;
use crate::fetch::FetchError;
use crate::stage::{StageError, StageMarker, StagedTree};
use crate::toolchain::{BuildError, CleanError, TestError, TestReport};

/// A stage was asked to run before the stage it depends on.
#[derive(Debug, Error)]
pub enum PrerequisiteError {
  #[error("cannot run tests: nothing is built for the configured pin (state: {state}); run `pinbuild build` first")]
  NotBuilt { state: PipelineState },

  #[error("staged source tree disappeared before the build could start")]
  NotStaged,
}

/// Every failure names the stage it came from.
#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("fetch stage failed: {0}")]
  Fetch(#[from] FetchError),

  #[error("extract stage failed: {0}")]
  Stage(#[from] StageError),

  #[error("build stage failed: {0}")]
  Build(#[from] BuildError),

  #[error("test stage failed: {0}")]
  Test(#[from] TestError),

  #[error("clean stage failed: {0}")]
  Clean(#[from] CleanError),

  #[error(transparent)]
  Prerequisite(#[from] PrerequisiteError),
}

impl PipelineError {
  /// Name of the stage that failed.
  pub fn stage(&self) -> &'static str {
    match self {
      PipelineError::Fetch(_) => "fetch",
      PipelineError::Stage(_) => "extract",
      PipelineError::Build(_) => "build",
      PipelineError::Test(_) | PipelineError::Prerequisite(_) => "test",
      PipelineError::Clean(_) => "clean",
    }
  }
}

#[derive(Debug, Clone)]
pub enum StageOutcome {
  /// The staged tree already matched the pin; nothing was fetched.
  AlreadyStaged(StageMarker),
  Staged(StagedTree),
}

impl StageOutcome {
  pub fn marker(&self) -> &StageMarker {
    match self {
      StageOutcome::AlreadyStaged(marker) => marker,
      StageOutcome::Staged(tree) => &tree.marker,
    }
  }

  pub fn fetched(&self) -> bool {
    matches!(self, StageOutcome::Staged(_))
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
  /// Compile even when the artifacts are up to date.
  pub force: bool,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
  pub stage: StageOutcome,
  /// False when the existing build was already up to date.
  pub compiled: bool,
  /// Absolute paths of the artifacts.
  pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct TestOptions {
  /// Build first when nothing usable is built. Without it a missing build is
  /// a [`PrerequisiteError`].
  pub build_missing: bool,
}

impl Default for TestOptions {
  fn default() -> Self {
    Self { build_missing: true }
  }
}

#[derive(Debug, Clone)]
pub struct TestOutcome {
  pub build: Option<BuildOutcome>,
  pub report: TestReport,
}

/// What `clean` found and removed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanOutcome {
  /// The toolchain's own clean was invoked.
  pub delegated: bool,
  /// Artifact files removed after delegation.
  pub removed_artifacts: Vec<PathBuf>,
  pub removed_markers: usize,
  pub removed_src: bool,
  pub removed_partials: usize,
}

impl CleanOutcome {
  /// True when there was nothing to clean.
  pub fn was_clean(&self) -> bool {
    !self.delegated
      && self.removed_artifacts.is_empty()
      && self.removed_markers == 0
      && !self.removed_src
      && self.removed_partials == 0
  }
}
