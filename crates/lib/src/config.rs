//! Pipeline configuration.
//!
//! Configuration is assembled once per invocation from three layers, lowest
//! precedence first:
//! - built-in defaults (the libmpack source used by the mpack Python binding)
//! - `pinbuild.toml` in the project directory, or an explicit `--config` file
//! - `PINBUILD_*` environment variables
//!
//! The result is an immutable [`PipelineConfig`] that every stage borrows.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{CONFIG_FILENAME, ENV_PREFIX};

pub const DEFAULT_URL: &str = "https://github.com/libmpack/libmpack/archive/{version}.tar.gz";
pub const DEFAULT_VERSION: &str = "1.0.5";
pub const DEFAULT_STRIP_COMPONENTS: usize = 1;
pub const DEFAULT_SRC_DIR: &str = "mpack-src";
pub const DEFAULT_BUILD_CMD: &str = "python setup.py build_ext --inplace";
pub const DEFAULT_TEST_CMD: &str = "python -m pytest";
pub const DEFAULT_CLEAN_CMD: &str = "python setup.py clean --all";
pub const DEFAULT_ARTIFACTS: &[&str] = &["*.so", "*.pyd"];

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: Box<toml::de::Error>,
  },

  #[error("project directory {path} is not accessible: {source}")]
  ProjectDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid value {value:?} for {var}: {message}")]
  InvalidEnv {
    var: String,
    value: String,
    message: String,
  },

  #[error("{field} must not be empty")]
  Empty { field: &'static str },

  #[error("src_dir must be a relative path inside the project directory, got {0}")]
  InvalidSrcDir(PathBuf),

  #[error("invalid artifact pattern {pattern:?}: {message}")]
  InvalidPattern { pattern: String, message: String },
}

/// On-disk shape of `pinbuild.toml`. Every key is optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
  pub url: Option<String>,
  pub version: Option<String>,
  pub strip_components: Option<usize>,
  pub src_dir: Option<PathBuf>,
  pub sha256: Option<String>,
  pub fetch_command: Option<String>,
  pub extract_command: Option<String>,
  pub artifacts: Option<Vec<String>>,
  #[serde(default)]
  pub toolchain: ToolchainFile,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolchainFile {
  pub build: Option<String>,
  pub test: Option<String>,
  pub clean: Option<String>,
  pub shell: Option<String>,
  pub timeout_secs: Option<u64>,
}

impl ConfigFile {
  /// Parse a config file from disk.
  pub fn read(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
      path: path.to_path_buf(),
      source: Box::new(e),
    })
  }

  /// Overlay `PINBUILD_*` environment variables onto the file values.
  pub fn apply_env(&mut self) -> Result<(), ConfigError> {
    let set = |field: &mut Option<String>, name: &str| {
      if let Some(value) = env_var(name) {
        *field = Some(value);
      }
    };

    set(&mut self.url, "URL");
    set(&mut self.version, "VERSION");
    set(&mut self.sha256, "SHA256");
    set(&mut self.fetch_command, "FETCH_CMD");
    set(&mut self.extract_command, "EXTRACT_CMD");
    set(&mut self.toolchain.build, "BUILD_CMD");
    set(&mut self.toolchain.test, "TEST_CMD");
    set(&mut self.toolchain.clean, "CLEAN_CMD");

    if let Some(dir) = env_var("SRC_DIR") {
      self.src_dir = Some(PathBuf::from(dir));
    }

    if let Some(strip) = env_var("STRIP") {
      let parsed = strip.trim().parse::<usize>().map_err(|e| ConfigError::InvalidEnv {
        var: format!("{ENV_PREFIX}STRIP"),
        value: strip.clone(),
        message: e.to_string(),
      })?;
      self.strip_components = Some(parsed);
    }

    Ok(())
  }
}

fn env_var(name: &str) -> Option<String> {
  std::env::var(format!("{ENV_PREFIX}{name}")).ok().filter(|v| !v.is_empty())
}

/// The identity of a staged source tree: where it came from and how it was unpacked.
///
/// A staged tree whose recorded pin differs from the configured one is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePin {
  /// Fully resolved URL (`{version}` already substituted).
  pub url: String,
  pub version: String,
  pub strip_components: usize,
}

/// How archive bytes are obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
  /// Built-in HTTP(S) / `file://` client.
  Builtin,
  /// Shell command whose stdout is the archive. `{url}` is substituted.
  Command(String),
}

/// How archive bytes are unpacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
  /// Built-in gzip/tar extraction.
  Builtin,
  /// Shell command reading the archive on stdin. `{dest}` and `{strip}` are substituted.
  Command(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainConfig {
  pub build: String,
  pub test: String,
  pub clean: String,
  /// Shell override; `/bin/sh` (unix) or PowerShell (windows) when unset.
  pub shell: Option<String>,
  /// Deadline applied to each external command.
  pub timeout: Option<Duration>,
}

/// Immutable configuration for a single pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub pin: SourcePin,
  /// Expected SHA-256 of the fetched archive, if pinned.
  pub sha256: Option<String>,
  pub transport: Transport,
  pub extraction: Extraction,
  /// Absolute project directory; build artifacts land here.
  pub project_dir: PathBuf,
  /// Absolute path of the staged source tree.
  pub src_dir: PathBuf,
  pub toolchain: ToolchainConfig,
  /// Glob patterns, relative to `project_dir`, that match build artifacts.
  pub artifacts: Vec<String>,
}

impl PipelineConfig {
  /// Load configuration for `project_dir`.
  ///
  /// With `config_path` the file must exist; otherwise `pinbuild.toml` in the
  /// project directory is used when present.
  pub fn load(project_dir: &Path, config_path: Option<&Path>) -> Result<Self, ConfigError> {
    let project_dir = dunce::canonicalize(project_dir).map_err(|source| ConfigError::ProjectDir {
      path: project_dir.to_path_buf(),
      source,
    })?;

    let mut file = match config_path {
      Some(path) => ConfigFile::read(path)?,
      None => {
        let default_path = project_dir.join(CONFIG_FILENAME);
        if default_path.exists() {
          ConfigFile::read(&default_path)?
        } else {
          debug!(path = %default_path.display(), "no config file, using defaults");
          ConfigFile::default()
        }
      }
    };
    file.apply_env()?;

    Self::from_file(file, project_dir)
  }

  /// Resolve a parsed config file against defaults. `project_dir` must be absolute.
  pub fn from_file(file: ConfigFile, project_dir: PathBuf) -> Result<Self, ConfigError> {
    let version = file.version.unwrap_or_else(|| DEFAULT_VERSION.to_string());
    if version.trim().is_empty() {
      return Err(ConfigError::Empty { field: "version" });
    }

    let url_template = file.url.unwrap_or_else(|| DEFAULT_URL.to_string());
    if url_template.trim().is_empty() {
      return Err(ConfigError::Empty { field: "url" });
    }
    let url = url_template.replace("{version}", &version);

    let src_rel = file.src_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_SRC_DIR));
    validate_src_dir(&src_rel)?;

    let artifacts = file
      .artifacts
      .unwrap_or_else(|| DEFAULT_ARTIFACTS.iter().map(|s| s.to_string()).collect());
    for pattern in &artifacts {
      glob::Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
        pattern: pattern.clone(),
        message: e.to_string(),
      })?;
    }

    let toolchain = ToolchainConfig {
      build: non_empty(file.toolchain.build, DEFAULT_BUILD_CMD, "toolchain.build")?,
      test: non_empty(file.toolchain.test, DEFAULT_TEST_CMD, "toolchain.test")?,
      clean: non_empty(file.toolchain.clean, DEFAULT_CLEAN_CMD, "toolchain.clean")?,
      shell: file.toolchain.shell,
      timeout: file.toolchain.timeout_secs.filter(|s| *s > 0).map(Duration::from_secs),
    };

    Ok(Self {
      pin: SourcePin {
        url,
        version,
        strip_components: file.strip_components.unwrap_or(DEFAULT_STRIP_COMPONENTS),
      },
      sha256: file.sha256.filter(|s| !s.trim().is_empty()),
      transport: file.fetch_command.map_or(Transport::Builtin, Transport::Command),
      extraction: file.extract_command.map_or(Extraction::Builtin, Extraction::Command),
      src_dir: project_dir.join(src_rel),
      project_dir,
      toolchain,
      artifacts,
    })
  }
}

fn non_empty(value: Option<String>, default: &str, field: &'static str) -> Result<String, ConfigError> {
  let value = value.unwrap_or_else(|| default.to_string());
  if value.trim().is_empty() {
    return Err(ConfigError::Empty { field });
  }
  Ok(value)
}

fn validate_src_dir(path: &Path) -> Result<(), ConfigError> {
  let mut normal = 0;
  for component in path.components() {
    match component {
      Component::Normal(_) => normal += 1,
      Component::CurDir => {}
      _ => return Err(ConfigError::InvalidSrcDir(path.to_path_buf())),
    }
  }
  if normal == 0 {
    return Err(ConfigError::InvalidSrcDir(path.to_path_buf()));
  }
  Ok(())
}
