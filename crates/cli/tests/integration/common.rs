//! Shared test helpers for CLI integration tests.

use std::io::Write;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;

pub const VERSION: &str = "1.0.0";

/// Each command appends a line to its log so tests can count invocations.
pub const BUILD_CMD: &str = r#"echo build >> build.log; cp "$PINBUILD_SRC_DIR/src/mpack.c" _mpack.so"#;
pub const TEST_CMD: &str = "echo test >> test.log";
pub const CLEAN_CMD: &str = "echo clean >> clean.log; rm -f _mpack.so";

/// Isolated project directory with a local source archive.
///
/// The archive is served over a `file://` URL from a sibling `archives/`
/// directory so no test touches the network.
pub struct TestEnv {
  pub temp: TempDir,
  pub project: PathBuf,
  pub archives: PathBuf,
}

impl TestEnv {
  /// Project configured with [`BUILD_CMD`], [`TEST_CMD`] and [`CLEAN_CMD`].
  pub fn new() -> Self {
    Self::with_commands(BUILD_CMD, TEST_CMD, CLEAN_CMD)
  }

  pub fn with_commands(build: &str, test: &str, clean: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let project = dunce::canonicalize(temp.path()).unwrap().join("project");
    let archives = dunce::canonicalize(temp.path()).unwrap().join("archives");
    std::fs::create_dir_all(&project).unwrap();
    std::fs::create_dir_all(&archives).unwrap();

    let env = Self { temp, project, archives };
    env.write_archive(VERSION);
    env.write_config(VERSION, build, test, clean);
    env
  }

  /// Write `libmpack-<version>.tar.gz` into the archive directory.
  pub fn write_archive(&self, version: &str) -> PathBuf {
    let root = format!("libmpack-{version}");
    let files = [
      (format!("{root}/setup.py"), "from setuptools import setup\n".to_string()),
      (format!("{root}/src/mpack.c"), format!("/* mpack {version} */\n")),
    ];

    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in &files {
      let mut header = tar::Header::new_gnu();
      header.set_size(content.len() as u64);
      header.set_mode(0o644);
      builder.append_data(&mut header, path, content.as_bytes()).unwrap();
    }
    let tar = builder.into_inner().unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    let path = self.archives.join(format!("{root}.tar.gz"));
    std::fs::write(&path, encoder.finish().unwrap()).unwrap();
    path
  }

  /// Commands are written as TOML basic strings; `Debug` escaping matches for ASCII.
  pub fn write_config(&self, version: &str, build: &str, test: &str, clean: &str) {
    let url = format!("file://{}/libmpack-{{version}}.tar.gz", self.archives.display());
    self.write_config_raw(&format!(
      r#"url = "{url}"
version = "{version}"
strip_components = 1

[toolchain]
build = {build:?}
test = {test:?}
clean = {clean:?}
"#
    ));
  }

  pub fn write_config_raw(&self, content: &str) {
    std::fs::write(self.project.join("pinbuild.toml"), content).unwrap();
  }

  pub fn path(&self, relative: &str) -> PathBuf {
    self.project.join(relative)
  }

  /// Number of lines in a command log, zero if it was never written.
  pub fn count(&self, log: &str) -> usize {
    std::fs::read_to_string(self.project.join(log))
      .map(|s| s.lines().count())
      .unwrap_or(0)
  }

  /// Get a Command for the pinbuild binary pointed at this project.
  pub fn pinbuild(&self) -> Command {
    pinbuild_in(&self.project)
  }

  /// `pinbuild status -o json`, parsed.
  pub fn status(&self) -> serde_json::Value {
    let output = self.pinbuild().args(["status", "-o", "json"]).output().unwrap();
    assert!(output.status.success(), "status failed: {}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
  }

  pub fn state(&self) -> String {
    self.status()["state"].as_str().unwrap().to_string()
  }
}

pub fn pinbuild_in(project: &Path) -> Command {
  let mut cmd: Command = cargo_bin_cmd!("pinbuild");
  cmd.arg("-C").arg(project);
  cmd.env_remove("RUST_LOG");
  for var in [
    "PINBUILD_URL",
    "PINBUILD_VERSION",
    "PINBUILD_STRIP",
    "PINBUILD_SRC_DIR",
    "PINBUILD_SHA256",
    "PINBUILD_FETCH_CMD",
    "PINBUILD_EXTRACT_CMD",
    "PINBUILD_BUILD_CMD",
    "PINBUILD_TEST_CMD",
    "PINBUILD_CLEAN_CMD",
  ] {
    cmd.env_remove(var);
  }
  cmd
}
