//! Archive fetching.
//!
//! A [`Fetcher`] turns a URL into the raw archive bytes. The fetcher is
//! stateless: every call goes back to the transport, nothing is cached. Any
//! transport failure (connection error, non-success status, redirect loop,
//! failing fetch command) is a single terminal [`FetchError`].

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{PipelineConfig, Transport};
use crate::shell::{ShellCommand, ShellError, run_shell};

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("malformed url {url:?}: {message}")]
  InvalidUrl { url: String, message: String },

  #[error("unsupported url scheme {scheme:?} in {url}")]
  UnsupportedScheme { url: String, scheme: String },

  #[error("request to {url} failed: {message}")]
  Transport { url: String, message: String },

  #[error("request to {url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("failed to read {url}: {source}")]
  Read {
    url: String,
    #[source]
    source: std::io::Error,
  },

  #[error("fetch command `{cmd}` exited with code {code:?}: {stderr}")]
  CommandFailed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error(transparent)]
  Shell(#[from] ShellError),

  #[error("sha256 mismatch for {url}: expected {expected}, got {actual}")]
  HashMismatch {
    url: String,
    expected: String,
    actual: String,
  },
}

/// Retrieves the bytes behind a URL.
pub trait Fetcher {
  fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Parse and validate a URL before any I/O happens.
pub fn parse_url(url: &str) -> Result<Url, FetchError> {
  Url::parse(url).map_err(|e| FetchError::InvalidUrl {
    url: url.to_string(),
    message: e.to_string(),
  })
}

/// Built-in transport: `http`, `https` and `file` URLs.
#[derive(Debug, Clone, Default)]
pub struct UrlFetcher {
  client: reqwest::Client,
  timeout: Option<Duration>,
}

impl UrlFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Bound each HTTP request, body included, by `timeout`.
  pub fn with_timeout(timeout: Option<Duration>) -> Self {
    Self {
      timeout,
      ..Self::default()
    }
  }
}

impl Fetcher for UrlFetcher {
  async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
    let parsed = parse_url(url)?;
    info!(url = %url, "fetching archive");

    match parsed.scheme() {
      "http" | "https" => {
        let mut request = self.client.get(parsed);
        if let Some(timeout) = self.timeout {
          request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(|e| FetchError::Transport {
          url: url.to_string(),
          message: e.to_string(),
        })?;

        if !response.status().is_success() {
          return Err(FetchError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
          });
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Transport {
          url: url.to_string(),
          message: e.to_string(),
        })?;

        info!(url = %url, size = bytes.len(), "download complete");
        Ok(bytes.to_vec())
      }
      "file" => {
        let path = parsed.to_file_path().map_err(|()| FetchError::InvalidUrl {
          url: url.to_string(),
          message: "not a local file path".to_string(),
        })?;
        debug!(path = %path.display(), "reading local archive");
        tokio::fs::read(&path).await.map_err(|source| FetchError::Read {
          url: url.to_string(),
          source,
        })
      }
      other => Err(FetchError::UnsupportedScheme {
        url: url.to_string(),
        scheme: other.to_string(),
      }),
    }
  }
}

/// External transport: a shell command (e.g. `curl -sSL {url}`) whose stdout is the archive.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
  pub command: String,
  pub shell: Option<String>,
  pub timeout: Option<Duration>,
}

impl Fetcher for CommandFetcher {
  async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
    parse_url(url)?;
    let cmd = self.command.replace("{url}", url);

    let mut env = BTreeMap::new();
    env.insert("PINBUILD_URL".to_string(), url.to_string());

    let output = run_shell(ShellCommand {
      cmd: &cmd,
      env,
      shell: self.shell.as_deref(),
      timeout: self.timeout,
      ..Default::default()
    })
    .await?;

    if !output.success() {
      return Err(FetchError::CommandFailed {
        cmd,
        code: output.code,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    info!(url = %url, size = output.stdout.len(), "fetch command complete");
    Ok(output.stdout)
  }
}

/// The fetcher selected by the configuration's transport.
#[derive(Debug, Clone)]
pub enum ConfiguredFetcher {
  Url(UrlFetcher),
  Command(CommandFetcher),
}

impl ConfiguredFetcher {
  pub fn from_config(config: &PipelineConfig) -> Self {
    match &config.transport {
      Transport::Builtin => Self::Url(UrlFetcher::with_timeout(config.toolchain.timeout)),
      Transport::Command(command) => Self::Command(CommandFetcher {
        command: command.clone(),
        shell: config.toolchain.shell.clone(),
        timeout: config.toolchain.timeout,
      }),
    }
  }
}

impl Fetcher for ConfiguredFetcher {
  async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
    match self {
      Self::Url(fetcher) => fetcher.fetch(url).await,
      Self::Command(fetcher) => fetcher.fetch(url).await,
    }
  }
}
