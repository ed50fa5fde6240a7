//! The staged build pipeline: fetch, stage, build, test and clean.
//!
//! [`Pipeline`] holds no progress of its own. Each operation probes the
//! filesystem first (see [`probe_state`]), skips whatever is already done for
//! the configured pin, and runs the remaining stages in order. Any stage
//! failure aborts the chain and is reported as a [`PipelineError`] naming the
//! stage.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use pinbuild_lib::config::PipelineConfig;
//! use pinbuild_lib::pipeline::{Pipeline, TestOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::load(Path::new("."), None)?;
//! let pipeline = Pipeline::from_config(config);
//! let outcome = pipeline.test(TestOptions::default()).await?;
//! assert!(outcome.report.passed());
//! # Ok(())
//! # }
//! ```

mod state;
mod types;

use tracing::{debug, info, warn};

pub use state::{BuildMarker, PipelineState, Probe, StaleReason, TestMarker, Workspace, probe_state};
pub use types::{
  BuildOptions, BuildOutcome, CleanOutcome, PipelineError, PrerequisiteError, StageOutcome, TestOptions, TestOutcome,
};

use crate::config::PipelineConfig;
use crate::consts::MARKER_VERSION;
use crate::fetch::{ConfiguredFetcher, FetchError, Fetcher};
use crate::stage::{StageError, Stager, remove_partials};
use crate::toolchain::{BuildError, CleanError, CommandToolchain, Toolchain};
use crate::util::fs::{remove_dir_if_exists, remove_file_if_exists};
use crate::util::hash::hash_bytes;
use state::{new_test_marker, write_json};

/// Drives the stages for one configuration.
pub struct Pipeline<F = ConfiguredFetcher, T = CommandToolchain> {
  config: PipelineConfig,
  workspace: Workspace,
  stager: Stager,
  fetcher: F,
  toolchain: T,
}

impl Pipeline {
  /// Production pipeline: configured transport and extraction, shell-command toolchain.
  pub fn from_config(config: PipelineConfig) -> Self {
    let fetcher = ConfiguredFetcher::from_config(&config);
    let toolchain = CommandToolchain::new(config.toolchain.clone());
    Self::new(config, fetcher, toolchain)
  }
}

impl<F: Fetcher + Sync, T: Toolchain + Sync> Pipeline<F, T> {
  pub fn new(config: PipelineConfig, fetcher: F, toolchain: T) -> Self {
    Self {
      workspace: Workspace::from_config(&config),
      stager: Stager::from_config(&config),
      config,
      fetcher,
      toolchain,
    }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn workspace(&self) -> &Workspace {
    &self.workspace
  }

  /// Current state as derived from the filesystem.
  pub fn probe(&self) -> Probe {
    probe_state(&self.workspace, &self.config.pin)
  }

  /// Make sure a staged tree matching the pin exists, fetching and extracting if not.
  pub async fn ensure_staged(&self) -> Result<StageOutcome, PipelineError> {
    let probe = self.probe();
    if let Some(marker) = probe.stage {
      debug!(src = %self.workspace.src_dir.display(), version = %marker.pin.version, "source already staged");
      return Ok(StageOutcome::AlreadyStaged(marker));
    }
    if let Some(reason) = &probe.stale {
      info!(src = %self.workspace.src_dir.display(), %reason, "replacing stale staged tree");
    }

    // Builds and test results of any previous tree are void from here on.
    self.remove_marker(&self.workspace.test_marker_path())?;
    self.remove_marker(&self.workspace.build_marker_path())?;

    let bytes = self.fetch_archive().await?;
    let tree = self
      .stager
      .stage(bytes, &self.workspace.src_dir, &self.config.pin)
      .await?;
    Ok(StageOutcome::Staged(tree))
  }

  /// Stage if needed, then compile unless the artifacts are already up to date.
  pub async fn build(&self, options: BuildOptions) -> Result<BuildOutcome, PipelineError> {
    let stage = self.ensure_staged().await?;
    let probe = self.probe();

    if !options.force && probe.state >= PipelineState::Built {
      info!(artifacts = probe.artifacts.len(), "build is up to date");
      return Ok(BuildOutcome {
        stage,
        compiled: false,
        artifacts: probe.artifacts,
      });
    }
    let Some(stage_marker) = probe.stage else {
      return Err(PrerequisiteError::NotStaged.into());
    };
    if let Some(reason) = &probe.stale {
      debug!(%reason, "rebuilding");
    }

    // A failed compile must leave the pipeline in Staged, not in a previous Built.
    self.remove_marker(&self.workspace.test_marker_path())?;
    self.remove_marker(&self.workspace.build_marker_path())?;

    let output = self
      .toolchain
      .compile(&self.workspace.src_dir, &self.workspace.project_dir)
      .await?;
    debug!(log = %output.log, "compile finished");

    let artifacts = self.workspace.find_artifacts();
    if artifacts.is_empty() {
      return Err(
        BuildError::MissingArtifacts {
          dir: self.workspace.project_dir.clone(),
          patterns: self.workspace.artifact_patterns.clone(),
        }
        .into(),
      );
    }

    let marker = BuildMarker {
      version: MARKER_VERSION,
      source_version: stage_marker.pin.version.clone(),
      staged_at_unix_nanos: stage_marker.staged_at_unix_nanos,
      artifacts: artifacts
        .iter()
        .filter_map(|p| p.strip_prefix(&self.workspace.project_dir).ok())
        .map(|p| p.to_path_buf())
        .collect(),
    };
    let marker_path = self.workspace.build_marker_path();
    write_json(&marker_path, &marker).map_err(|e| BuildError::Marker {
      path: marker_path,
      message: e.to_string(),
    })?;

    info!(artifacts = artifacts.len(), version = %marker.source_version, "build complete");
    Ok(BuildOutcome {
      stage,
      compiled: true,
      artifacts,
    })
  }

  /// Run the test suite against the current build.
  ///
  /// Tests always run, even in the `Tested` state. Failing tests are a
  /// successful outcome carrying a failed [`TestReport`](crate::toolchain::TestReport).
  pub async fn test(&self, options: TestOptions) -> Result<TestOutcome, PipelineError> {
    let build = if options.build_missing {
      Some(self.build(BuildOptions::default()).await?)
    } else {
      None
    };

    let probe = self.probe();
    if probe.state < PipelineState::Built {
      return Err(PrerequisiteError::NotBuilt { state: probe.state }.into());
    }
    let staged_at = probe.stage.as_ref().map_or(0, |m| m.staged_at_unix_nanos);

    let marker_path = self.workspace.test_marker_path();
    self.remove_marker(&marker_path)?;

    let report = self.toolchain.run_tests(&self.workspace.project_dir).await?;

    if report.passed() {
      if let Err(e) = write_json(&marker_path, &new_test_marker(staged_at)) {
        warn!(path = %marker_path.display(), error = %e, "failed to record test result");
      }
      info!("all tests passed");
    } else {
      info!(failures = report.failures().len(), "tests failed");
    }

    Ok(TestOutcome { build, report })
  }

  /// Remove every trace of the pipeline: artifacts, markers, the staged tree
  /// and leftover partial extractions. Safe to run in any state.
  pub async fn clean(&self) -> Result<CleanOutcome, PipelineError> {
    let probe = self.probe();
    let mut outcome = CleanOutcome::default();

    // The toolchain's clean may need the staged sources, so it goes first.
    if probe.build.is_some() || !probe.artifacts.is_empty() {
      self.toolchain.clean(&self.workspace.project_dir).await?;
      outcome.delegated = true;
    } else {
      debug!("nothing built, skipping toolchain clean");
    }

    for path in self.workspace.find_artifacts() {
      remove_file_if_exists(&path).map_err(|source| CleanError::Remove {
        path: path.clone(),
        source,
      })?;
      outcome.removed_artifacts.push(path);
    }

    for path in [self.workspace.test_marker_path(), self.workspace.build_marker_path()] {
      if remove_file_if_exists(&path).map_err(|source| CleanError::Remove { path: path.clone(), source })? {
        outcome.removed_markers += 1;
      }
    }

    let src = &self.workspace.src_dir;
    outcome.removed_src = remove_dir_if_exists(src).map_err(|source| CleanError::Remove {
      path: src.clone(),
      source,
    })?;
    outcome.removed_partials = remove_partials(src).map_err(|source| CleanError::Remove {
      path: src.clone(),
      source,
    })?;

    if outcome.was_clean() {
      info!("already clean");
    } else {
      info!(
        delegated = outcome.delegated,
        artifacts = outcome.removed_artifacts.len(),
        src = outcome.removed_src,
        "clean complete"
      );
    }
    Ok(outcome)
  }

  async fn fetch_archive(&self) -> Result<Vec<u8>, FetchError> {
    let url = &self.config.pin.url;
    let bytes = self.fetcher.fetch(url).await?;

    let actual = hash_bytes(&bytes);
    match &self.config.sha256 {
      Some(expected) if !actual.matches(expected) => {
        return Err(FetchError::HashMismatch {
          url: url.clone(),
          expected: expected.trim().to_lowercase(),
          actual: actual.0,
        });
      }
      Some(_) => debug!(sha256 = %actual, "archive digest verified"),
      None => debug!(sha256 = %actual, "archive fetched without a pinned digest"),
    }
    Ok(bytes)
  }

  fn remove_marker(&self, path: &std::path::Path) -> Result<(), StageError> {
    remove_file_if_exists(path).map_err(|source| StageError::Write {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(())
  }
}
