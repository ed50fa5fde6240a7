//! Status command implementation.
//!
//! Reports the state derived from the filesystem: the pin, the staged tree,
//! the build and the last passing test run. Never modifies anything.

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use pinbuild_lib::config::SourcePin;
use pinbuild_lib::pipeline::{Pipeline, PipelineState, StaleReason, TestMarker};
use pinbuild_lib::util::fs::{dir_size, modified};
use pinbuild_lib::workspace_lock::LockMode;

use super::CommandContext;
use crate::output::{
  format_age, format_bytes, format_unix, print_info, print_item, print_json, print_path, print_stat, print_success, print_warning,
  short_digest,
};

#[derive(Serialize)]
struct StatusReport {
  state: PipelineState,
  pin: SourcePin,
  project_dir: PathBuf,
  src_dir: PathBuf,
  src_size_bytes: u64,
  sha256: Option<String>,
  artifacts: Vec<PathBuf>,
  last_passed_unix: Option<u64>,
  stale: Option<StaleReason>,
}

pub fn cmd_status(ctx: &CommandContext) -> Result<()> {
  let (config, _lock) = ctx.prepare(LockMode::Shared, "status")?;
  let pipeline = Pipeline::from_config(config);
  let probe = pipeline.probe();
  let config = pipeline.config();

  let last_passed = (probe.state == PipelineState::Tested)
    .then(|| read_test_marker(&pipeline.workspace().test_marker_path()))
    .flatten()
    .map(|m| m.passed_at_unix);

  let report = StatusReport {
    state: probe.state,
    pin: config.pin.clone(),
    project_dir: config.project_dir.clone(),
    src_dir: config.src_dir.clone(),
    src_size_bytes: dir_size(&config.src_dir),
    sha256: probe.stage.as_ref().map(|m| m.sha256.clone()),
    artifacts: probe.artifacts.clone(),
    last_passed_unix: last_passed,
    stale: probe.stale.clone(),
  };

  if ctx.output.is_json() {
    return print_json(&report);
  }

  match report.state {
    PipelineState::Empty => print_info("Nothing staged. Run 'pinbuild build' to fetch and build."),
    state => print_success(&format!("State: {state}")),
  }
  print_stat("Version", &report.pin.version);
  print_stat("URL", &report.pin.url);
  print_stat("Strip", &report.pin.strip_components.to_string());
  if let Some(sha256) = &report.sha256 {
    print_stat("SHA-256", short_digest(sha256));
    print_stat("Source", &format!("{} ({})", report.src_dir.display(), format_bytes(report.src_size_bytes)));
  }
  if !report.artifacts.is_empty() {
    print_stat("Artifacts", &report.artifacts.len().to_string());
    for artifact in &report.artifacts {
      match modified(artifact) {
        Some(time) => print_item(&format!("{} (built {})", artifact.display(), format_age(time))),
        None => print_path(artifact),
      }
    }
  }
  if let Some(secs) = report.last_passed_unix {
    print_stat("Tests passed", &format_unix(secs));
  }
  if let Some(reason) = &report.stale {
    print_warning(&format!("Stale: {reason}"));
  }

  Ok(())
}

fn read_test_marker(path: &std::path::Path) -> Option<TestMarker> {
  let content = std::fs::read_to_string(path).ok()?;
  serde_json::from_str(&content).ok()
}
