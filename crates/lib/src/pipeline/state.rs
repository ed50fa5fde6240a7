//! Deriving the pipeline state from the filesystem.
//!
//! Nothing about the pipeline's progress is kept in memory between
//! invocations. Every entry point starts with [`probe_state`], which looks at
//! the staged tree, the markers and the artifacts on disk:
//!
//! - `Empty`: no staged tree, or one that does not match the configured pin
//! - `Staged`: a staged tree whose marker matches the pin
//! - `Built`: additionally, a build marker made from that exact staged tree
//!   and every artifact it recorded still present
//! - `Tested`: additionally, a test marker for that staged tree

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{PipelineConfig, SourcePin};
use crate::consts::{BUILD_MARKER, MARKER_VERSION, PARTIAL_PREFIX, TEST_MARKER};
use crate::stage::{StageMarker, read_stage_marker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
  Empty,
  Staged,
  Built,
  Tested,
}

impl fmt::Display for PipelineState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      PipelineState::Empty => "empty",
      PipelineState::Staged => "staged",
      PipelineState::Built => "built",
      PipelineState::Tested => "tested",
    };
    f.write_str(s)
  }
}

/// Why an existing staged tree or build does not count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StaleReason {
  /// The staged directory exists but has no marker (interrupted or foreign).
  MissingStageMarker,
  InvalidStageMarker { message: String },
  /// The staged tree was made from a different url, version or strip count.
  PinMismatch { found: SourcePin },
  /// The build marker refers to an earlier staged tree.
  BuildOutdated,
  /// A recorded artifact has been removed.
  ArtifactMissing { path: PathBuf },
}

impl fmt::Display for StaleReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StaleReason::MissingStageMarker => write!(f, "staged tree has no marker"),
      StaleReason::InvalidStageMarker { message } => write!(f, "stage marker is unreadable: {message}"),
      StaleReason::PinMismatch { found } => write!(
        f,
        "staged tree is version {} from {} (strip {})",
        found.version, found.url, found.strip_components
      ),
      StaleReason::BuildOutdated => write!(f, "build predates the current staged tree"),
      StaleReason::ArtifactMissing { path } => write!(f, "artifact {} is missing", path.display()),
    }
  }
}

/// Contents of `.pinbuild-build.json` in the project directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMarker {
  pub version: u32,
  pub source_version: String,
  /// `staged_at` of the staged tree the build was made from.
  pub staged_at_unix_nanos: u64,
  /// Artifacts found after the build, relative to the project directory.
  pub artifacts: Vec<PathBuf>,
}

/// Contents of `.pinbuild-test.json` in the project directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMarker {
  pub version: u32,
  pub staged_at_unix_nanos: u64,
  pub passed_at_unix: u64,
}

/// Where the pipeline keeps its state.
#[derive(Debug, Clone)]
pub struct Workspace {
  pub project_dir: PathBuf,
  pub src_dir: PathBuf,
  /// Glob patterns, relative to `project_dir`, matching build artifacts.
  pub artifact_patterns: Vec<String>,
}

impl Workspace {
  pub fn from_config(config: &PipelineConfig) -> Self {
    Self {
      project_dir: config.project_dir.clone(),
      src_dir: config.src_dir.clone(),
      artifact_patterns: config.artifacts.clone(),
    }
  }

  pub fn build_marker_path(&self) -> PathBuf {
    self.project_dir.join(BUILD_MARKER)
  }

  pub fn test_marker_path(&self) -> PathBuf {
    self.project_dir.join(TEST_MARKER)
  }

  /// Files in the project directory matching the artifact patterns, sorted.
  ///
  /// Anything inside the staged tree is ignored.
  pub fn find_artifacts(&self) -> Vec<PathBuf> {
    let base = glob::Pattern::escape(&self.project_dir.to_string_lossy());
    let mut found = Vec::new();

    for pattern in &self.artifact_patterns {
      let full = format!("{}/{}", base.trim_end_matches('/'), pattern);
      let Ok(paths) = glob::glob(&full) else {
        continue;
      };
      for path in paths.filter_map(Result::ok) {
        if path.is_file() && !path.starts_with(&self.src_dir) && !self.in_partial(&path) && !found.contains(&path) {
          found.push(path);
        }
      }
    }

    found.sort();
    found
  }

  /// Whether `path` lies inside an unfinished extraction directory.
  fn in_partial(&self, path: &Path) -> bool {
    path
      .strip_prefix(&self.project_dir)
      .map(|rel| {
        rel
          .components()
          .any(|c| c.as_os_str().to_string_lossy().starts_with(PARTIAL_PREFIX))
      })
      .unwrap_or(false)
  }
}

/// Snapshot of what is on disk.
#[derive(Debug, Clone, Serialize)]
pub struct Probe {
  pub state: PipelineState,
  /// Marker of the staged tree, present only when it matches the pin.
  pub stage: Option<StageMarker>,
  /// Build marker as found on disk, fresh or not.
  pub build: Option<BuildMarker>,
  /// Artifacts currently matching the configured patterns.
  pub artifacts: Vec<PathBuf>,
  /// Why an existing staged tree or build was not counted.
  pub stale: Option<StaleReason>,
}

/// Derive the current state from the filesystem. Never mutates anything.
pub fn probe_state(workspace: &Workspace, pin: &SourcePin) -> Probe {
  let artifacts = workspace.find_artifacts();
  let build = read_json::<BuildMarker>(&workspace.build_marker_path());

  let mut probe = Probe {
    state: PipelineState::Empty,
    stage: None,
    build,
    artifacts,
    stale: None,
  };

  if !workspace.src_dir.is_dir() {
    return probe;
  }

  let marker = match read_stage_marker(&workspace.src_dir) {
    Ok(Some(marker)) => marker,
    Ok(None) => {
      probe.stale = Some(StaleReason::MissingStageMarker);
      return probe;
    }
    Err(e) => {
      probe.stale = Some(StaleReason::InvalidStageMarker { message: e.to_string() });
      return probe;
    }
  };

  if marker.pin != *pin {
    probe.stale = Some(StaleReason::PinMismatch { found: marker.pin });
    return probe;
  }

  probe.state = PipelineState::Staged;
  let staged_at = marker.staged_at_unix_nanos;
  probe.stage = Some(marker);

  let Some(build) = &probe.build else {
    return probe;
  };
  if build.staged_at_unix_nanos != staged_at || build.source_version != pin.version {
    probe.stale = Some(StaleReason::BuildOutdated);
    return probe;
  }
  if build.artifacts.is_empty() {
    probe.stale = Some(StaleReason::BuildOutdated);
    return probe;
  }
  if let Some(missing) = build
    .artifacts
    .iter()
    .find(|rel| !workspace.project_dir.join(rel).is_file())
  {
    probe.stale = Some(StaleReason::ArtifactMissing { path: missing.clone() });
    return probe;
  }

  probe.state = PipelineState::Built;

  if let Some(test) = read_json::<TestMarker>(&workspace.test_marker_path())
    && test.staged_at_unix_nanos == staged_at
  {
    probe.state = PipelineState::Tested;
  }

  probe
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
  let content = std::fs::read_to_string(path).ok()?;
  match serde_json::from_str(&content) {
    Ok(value) => Some(value),
    Err(e) => {
      debug!(path = %path.display(), error = %e, "ignoring unreadable marker");
      None
    }
  }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
  let content = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
  std::fs::write(path, format!("{content}\n"))
}

pub(crate) fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

pub(crate) fn new_test_marker(staged_at_unix_nanos: u64) -> TestMarker {
  TestMarker {
    version: MARKER_VERSION,
    staged_at_unix_nanos,
    passed_at_unix: unix_now(),
  }
}
