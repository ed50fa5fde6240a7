//! Shell command execution for the opaque external capabilities.
//!
//! Fetch commands, extraction commands and the toolchain's build/test/clean
//! commands all run through [`run_shell`]. The command inherits the user's
//! environment (compilers and interpreters are found on the user's PATH) with
//! a handful of `PINBUILD_*` variables layered on top.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ShellError {
  #[error("failed to spawn `{cmd}`: {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: std::io::Error,
  },

  #[error("i/o error while running `{cmd}`: {source}")]
  Io {
    cmd: String,
    #[source]
    source: std::io::Error,
  },

  #[error("`{cmd}` timed out after {}s", .after.as_secs())]
  TimedOut { cmd: String, after: Duration },
}

/// Everything needed to launch one shell command.
#[derive(Debug, Clone, Default)]
pub struct ShellCommand<'a> {
  pub cmd: &'a str,
  pub cwd: Option<&'a Path>,
  pub env: BTreeMap<String, String>,
  /// Bytes piped to the child's stdin; stdin is closed when `None`.
  pub stdin: Option<&'a [u8]>,
  pub shell: Option<&'a str>,
  pub timeout: Option<Duration>,
}

/// Captured result of a finished command. A non-zero exit is not an error here.
#[derive(Debug, Clone)]
pub struct ShellOutput {
  pub code: Option<i32>,
  pub stdout: Vec<u8>,
  pub stderr: Vec<u8>,
}

impl ShellOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }

  /// Stdout followed by stderr, lossily decoded.
  pub fn combined(&self) -> String {
    let stdout = String::from_utf8_lossy(&self.stdout);
    let stderr = String::from_utf8_lossy(&self.stderr);
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
      (false, false) => format!("{}\n{}", stdout.trim_end(), stderr.trim_end()),
      (false, true) => stdout.trim_end().to_string(),
      (true, false) => stderr.trim_end().to_string(),
      (true, true) => String::new(),
    }
  }
}

/// Run `spec.cmd` through the shell and capture its output.
///
/// The child is killed if the optional deadline expires.
pub async fn run_shell(spec: ShellCommand<'_>) -> Result<ShellOutput, ShellError> {
  info!(cmd = %spec.cmd, "executing command");

  let (shell_cmd, shell_args) = get_shell(spec.shell);

  let mut command = Command::new(&shell_cmd);
  command
    .args(&shell_args)
    .arg(spec.cmd)
    .envs(&spec.env)
    .stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  if let Some(cwd) = spec.cwd {
    command.current_dir(cwd);
  }

  debug!(shell = %shell_cmd, cwd = ?spec.cwd, "spawning process");

  let mut child = command.spawn().map_err(|source| ShellError::Spawn {
    cmd: spec.cmd.to_string(),
    source,
  })?;

  let io_err = |source: std::io::Error| ShellError::Io {
    cmd: spec.cmd.to_string(),
    source,
  };

  // Feed stdin from a separate task so a child that fills its stdout pipe
  // before draining stdin cannot deadlock us.
  let writer = match (spec.stdin, child.stdin.take()) {
    (Some(bytes), Some(mut stdin)) => {
      let bytes = bytes.to_vec();
      Some(tokio::spawn(async move {
        let result = stdin.write_all(&bytes).await;
        drop(stdin);
        result
      }))
    }
    _ => None,
  };

  let output = match spec.timeout {
    Some(after) => match tokio::time::timeout(after, child.wait_with_output()).await {
      Ok(output) => output.map_err(io_err)?,
      Err(_) => {
        return Err(ShellError::TimedOut {
          cmd: spec.cmd.to_string(),
          after,
        });
      }
    },
    None => child.wait_with_output().await.map_err(io_err)?,
  };

  if let Some(writer) = writer {
    match writer.await {
      // The child may legitimately exit without reading all of stdin.
      Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(io_err(e)),
      Ok(_) => {}
      Err(join) => return Err(io_err(std::io::Error::other(join))),
    }
  }

  let result = ShellOutput {
    code: output.status.code(),
    stdout: output.stdout,
    stderr: output.stderr,
  };

  if !result.success() {
    debug!(code = ?result.code, output = %result.combined(), "command failed");
  }

  Ok(result)
}

/// Get the shell command and arguments for the current platform.
///
/// An explicit override picks its argument style from the shell name.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
