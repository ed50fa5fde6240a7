//! Test utilities for pinbuild-lib.
//!
//! In-memory archive construction plus fake fetch and toolchain capabilities
//! that record how often they were invoked.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tar::{EntryType, Header};

use crate::config::{ConfigFile, PipelineConfig, SourcePin};
use crate::fetch::{FetchError, Fetcher};
use crate::toolchain::{BuildError, CleanError, CompileOutput, TestError, TestReport, Toolchain};

pub const TEST_VERSION: &str = "1.0.0";

pub fn test_pin(strip: usize) -> SourcePin {
  SourcePin {
    url: format!("https://example.test/libmpack-{TEST_VERSION}.tar.gz"),
    version: TEST_VERSION.to_string(),
    strip_components: strip,
  }
}

/// Default configuration rooted at `project_dir`, pinned to [`test_pin`]`(1)`.
pub fn test_config(project_dir: &Path) -> PipelineConfig {
  let file = ConfigFile {
    url: Some("https://example.test/libmpack-{version}.tar.gz".to_string()),
    version: Some(TEST_VERSION.to_string()),
    ..Default::default()
  };
  PipelineConfig::from_file(file, project_dir.to_path_buf()).unwrap()
}

/// Builds tar archives in memory.
pub struct TarBuilder {
  builder: tar::Builder<Vec<u8>>,
}

impl TarBuilder {
  pub fn new() -> Self {
    Self {
      builder: tar::Builder::new(Vec::new()),
    }
  }

  pub fn dir(mut self, path: &str) -> Self {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_mode(0o755);
    header.set_size(0);
    self.builder.append_data(&mut header, path, io::empty()).unwrap();
    self
  }

  pub fn file(mut self, path: &str, content: &str) -> Self {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(0o644);
    header.set_size(content.len() as u64);
    self.builder.append_data(&mut header, path, content.as_bytes()).unwrap();
    self
  }

  /// Append a file whose name is written verbatim, bypassing the `..` check
  /// `tar` applies to paths.
  pub fn raw_file(mut self, path: &str, content: &str) -> Self {
    let mut header = Header::new_gnu();
    let name = path.as_bytes();
    header.as_old_mut().name[..name.len()].copy_from_slice(name);
    header.set_entry_type(EntryType::Regular);
    header.set_mode(0o644);
    header.set_size(content.len() as u64);
    header.set_cksum();
    self.builder.append(&header, content.as_bytes()).unwrap();
    self
  }

  pub fn symlink(mut self, path: &str, target: &str) -> Self {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Symlink);
    header.set_mode(0o777);
    header.set_size(0);
    header.set_link_name(target).unwrap();
    self.builder.append_data(&mut header, path, io::empty()).unwrap();
    self
  }

  pub fn tar(self) -> Vec<u8> {
    self.builder.into_inner().unwrap()
  }

  pub fn gzip(self) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    let tar = self.tar();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
  }
}

/// A small libmpack-like source archive with a wrapper directory.
pub fn sample_source() -> Vec<u8> {
  TarBuilder::new()
    .dir("libmpack-1.0.0/")
    .file("libmpack-1.0.0/setup.py", "from setuptools import setup\n")
    .file("libmpack-1.0.0/src/mpack.c", "int mpack;\n")
    .gzip()
}

/// Serves fixed bytes (or a fixed error) and counts calls.
#[derive(Debug, Clone)]
pub struct FakeFetcher {
  bytes: Vec<u8>,
  status: Option<u16>,
  calls: Arc<AtomicUsize>,
}

impl FakeFetcher {
  pub fn new(bytes: Vec<u8>) -> Self {
    Self {
      bytes,
      status: None,
      calls: Arc::default(),
    }
  }

  /// Every fetch fails as if the server answered with `status`.
  pub fn failing(status: u16) -> Self {
    Self {
      bytes: Vec::new(),
      status: Some(status),
      calls: Arc::default(),
    }
  }

  pub fn calls(&self) -> Arc<AtomicUsize> {
    Arc::clone(&self.calls)
  }
}

impl Fetcher for FakeFetcher {
  async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    match self.status {
      Some(status) => Err(FetchError::Status {
        url: url.to_string(),
        status,
      }),
      None => Ok(self.bytes.clone()),
    }
  }
}

#[derive(Debug, Default)]
pub struct ToolchainCalls {
  pub compile: AtomicUsize,
  pub tests: AtomicUsize,
  pub clean: AtomicUsize,
}

impl ToolchainCalls {
  pub fn compile(&self) -> usize {
    self.compile.load(Ordering::SeqCst)
  }

  pub fn tests(&self) -> usize {
    self.tests.load(Ordering::SeqCst)
  }

  pub fn clean(&self) -> usize {
    self.clean.load(Ordering::SeqCst)
  }
}

/// Writes `_mpack.so` on compile and removes it on clean.
#[derive(Debug, Clone)]
pub struct FakeToolchain {
  pub artifact: PathBuf,
  pub fail_build: bool,
  /// Succeed without writing the artifact.
  pub skip_artifact: bool,
  pub report: TestReport,
  pub calls: Arc<ToolchainCalls>,
}

impl Default for FakeToolchain {
  fn default() -> Self {
    Self {
      artifact: PathBuf::from("_mpack.so"),
      fail_build: false,
      skip_artifact: false,
      report: TestReport::AllPassed,
      calls: Arc::default(),
    }
  }
}

impl Toolchain for FakeToolchain {
  async fn compile(&self, source_dir: &Path, out_dir: &Path) -> Result<CompileOutput, BuildError> {
    self.calls.compile.fetch_add(1, Ordering::SeqCst);

    if self.fail_build || !source_dir.join("src/mpack.c").is_file() {
      return Err(BuildError::Failed {
        cmd: "fake build".to_string(),
        code: Some(1),
        diagnostics: "src/mpack.c:1:1: error: expected ';'".to_string(),
      });
    }

    if !self.skip_artifact {
      std::fs::write(out_dir.join(&self.artifact), "ELF").unwrap();
    }
    Ok(CompileOutput {
      log: "building '_mpack' extension".to_string(),
    })
  }

  async fn run_tests(&self, _dir: &Path) -> Result<TestReport, TestError> {
    self.calls.tests.fetch_add(1, Ordering::SeqCst);
    Ok(self.report.clone())
  }

  async fn clean(&self, dir: &Path) -> Result<(), CleanError> {
    self.calls.clean.fetch_add(1, Ordering::SeqCst);
    let path = dir.join(&self.artifact);
    crate::util::fs::remove_file_if_exists(&path).map_err(|source| CleanError::Remove { path, source })?;
    Ok(())
  }
}
