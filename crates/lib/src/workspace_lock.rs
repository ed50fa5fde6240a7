//! Advisory lock serializing pipeline commands on one project directory.
//!
//! Probing the workspace and then mutating it is not atomic, so `fetch`,
//! `build`, `test` and `clean` hold `<project>/.pinbuild.lock` exclusively for
//! their whole run while `status` holds it shared. The exclusive holder writes
//! a [`LockHolder`] record into the file so a blocked command can name it.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::LOCK_FILENAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  /// Read-only inspection; any number may coexist.
  Shared,
  /// Anything that fetches, stages, builds, tests or cleans.
  Exclusive,
}

/// The pinbuild command holding the exclusive lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub command: String,
  pub pid: u32,
  pub acquired_at_unix: u64,
  pub project_dir: PathBuf,
}

impl LockHolder {
  fn current(command: &str, project_dir: &Path) -> Self {
    Self {
      command: command.to_string(),
      pid: std::process::id(),
      acquired_at_unix: unix_now(),
      project_dir: project_dir.to_path_buf(),
    }
  }

  pub fn held_for_secs(&self) -> u64 {
    unix_now().saturating_sub(self.acquired_at_unix)
  }
}

impl fmt::Display for LockHolder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "`pinbuild {}` (pid {}) has held it for {}s",
      self.command,
      self.pid,
      self.held_for_secs()
    )
  }
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("project {} is busy: {holder}\nif that process is gone, delete {}", .project_dir.display(), .lock_path.display())]
  Busy {
    project_dir: PathBuf,
    holder: LockHolder,
    lock_path: PathBuf,
  },

  #[error("project {} is busy with another pinbuild command\nif none is running, delete {}", .project_dir.display(), .lock_path.display())]
  BusyUnknownHolder { project_dir: PathBuf, lock_path: PathBuf },

  #[error("cannot {action} {}: {source}", .path.display())]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Held lock on a project directory; released when dropped.
#[derive(Debug)]
pub struct WorkspaceLock {
  file: File,
  path: PathBuf,
}

impl WorkspaceLock {
  /// Take the lock on `project_dir` without waiting.
  pub fn acquire(project_dir: &Path, mode: LockMode, command: &str) -> Result<Self, LockError> {
    let path = project_dir.join(LOCK_FILENAME);
    let io_err = |action, source| LockError::Io {
      action,
      path: path.clone(),
      source,
    };

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(|e| io_err("open lock file", e))?;

    match try_lock(&file, mode) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(busy(project_dir, &path)),
      Err(e) => return Err(io_err("lock", e)),
    }

    let lock = WorkspaceLock { file, path: path.clone() };
    if mode == LockMode::Exclusive {
      lock
        .record(&LockHolder::current(command, project_dir))
        .map_err(|e| io_err("record holder in", e))?;
    }

    debug!(path = %lock.path.display(), ?mode, command, "workspace lock acquired");
    Ok(lock)
  }

  /// The holder record, read through the held handle.
  ///
  /// Windows locks are mandatory, so a second handle could not read it.
  pub fn holder(&self) -> io::Result<LockHolder> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn record(&self, holder: &LockHolder) -> io::Result<()> {
    let mut file = &self.file;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    serde_json::to_writer(&mut file, holder).map_err(io::Error::other)?;
    file.flush()
  }
}

fn busy(project_dir: &Path, lock_path: &Path) -> LockError {
  let holder = std::fs::read_to_string(lock_path)
    .ok()
    .and_then(|contents| serde_json::from_str::<LockHolder>(&contents).ok());

  match holder {
    Some(holder) => LockError::Busy {
      project_dir: project_dir.to_path_buf(),
      holder,
      lock_path: lock_path.to_path_buf(),
    },
    None => LockError::BusyUnknownHolder {
      project_dir: project_dir.to_path_buf(),
      lock_path: lock_path.to_path_buf(),
    },
  }
}

fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or_default()
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };
  flock(file, operation).map_err(io::Error::from)
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: a zeroed OVERLAPPED locks from offset 0; `file` owns the handle
  // for the duration of the call.
  let locked = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(file.as_raw_handle() as HANDLE, flags, 0, 1, 0, &mut overlapped)
  };

  if locked == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
