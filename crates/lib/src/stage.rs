//! Source staging: unpacking the fetched archive into the staged source tree.
//!
//! Extraction never writes into the live destination. Entries are unpacked
//! into a sibling `.pinbuild-partial-*` directory, the stage marker is written
//! last, and only then is the partial directory renamed over the destination.
//! A failed or interrupted extraction therefore leaves either nothing or the
//! previous tree behind, never a half-written one.
//!
//! # Strip count
//!
//! Each entry loses its first `strip_components` path segments. Entries with
//! that many segments or fewer would land on the destination root itself and
//! are discarded. `.` segments are not counted.

use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tar::{Archive, EntryType};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{Extraction, PipelineConfig, SourcePin};
use crate::consts::{MARKER_VERSION, PARTIAL_PREFIX, STAGE_MARKER};
use crate::shell::{ShellCommand, ShellError, run_shell};
use crate::util::fs::remove_dir_if_exists;
use crate::util::hash::hash_bytes;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum StageError {
  #[error("failed to create {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("malformed archive: {0}")]
  Archive(String),

  #[error("archive entry {0} escapes the destination directory")]
  PathTraversal(PathBuf),

  #[error("archive contained no entries below strip depth {strip}")]
  Empty { strip: usize },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("extract command `{cmd}` exited with code {code:?}: {stderr}")]
  CommandFailed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error(transparent)]
  Shell(#[from] ShellError),

  #[error("invalid stage marker at {path}: {message}")]
  Marker { path: PathBuf, message: String },

  #[error("failed to move staged tree into {path}: {source}")]
  Replace {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("extraction task failed: {0}")]
  Task(String),
}

/// Contents of `.pinbuild-stage.json` inside a staged tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMarker {
  /// Marker format version. The flattened pin owns the `version` key.
  #[serde(rename = "marker_version")]
  pub version: u32,
  #[serde(flatten)]
  pub pin: SourcePin,
  /// SHA-256 of the archive bytes the tree was extracted from.
  pub sha256: String,
  /// Number of filesystem entries written.
  pub entries: usize,
  /// When the tree was staged. Builds record this to detect restaging.
  pub staged_at_unix_nanos: u64,
}

/// A successfully staged source tree.
#[derive(Debug, Clone)]
pub struct StagedTree {
  pub root: PathBuf,
  pub marker: StageMarker,
  /// Archive entries discarded by the strip count.
  pub skipped: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct ExtractStats {
  entries: usize,
  skipped: usize,
}

/// Read the stage marker of a staged tree.
///
/// Returns `None` if the marker doesn't exist.
pub fn read_stage_marker(root: &Path) -> Result<Option<StageMarker>, StageError> {
  let marker_path = root.join(STAGE_MARKER);

  let content = match std::fs::read_to_string(&marker_path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(e) => {
      return Err(StageError::Marker {
        path: marker_path,
        message: e.to_string(),
      });
    }
  };

  let marker = serde_json::from_str(&content).map_err(|e| StageError::Marker {
    path: marker_path,
    message: e.to_string(),
  })?;
  Ok(Some(marker))
}

/// Remove partial extraction directories left beside `dest` by interrupted runs.
///
/// Returns the number of directories removed.
pub fn remove_partials(dest: &Path) -> io::Result<usize> {
  let (Some(parent), Some(name)) = (dest.parent(), dest.file_name()) else {
    return Ok(0);
  };
  let prefix = format!("{}{}", PARTIAL_PREFIX, name.to_string_lossy());

  let entries = match std::fs::read_dir(parent) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
    Err(e) => return Err(e),
  };

  let mut removed = 0;
  for entry in entries {
    let entry = entry?;
    if entry.file_name().to_string_lossy().starts_with(&prefix) && entry.file_type()?.is_dir() {
      debug!(path = %entry.path().display(), "removing partial staging directory");
      if remove_dir_if_exists(&entry.path())? {
        removed += 1;
      }
    }
  }
  Ok(removed)
}

/// How the stager unpacks archive bytes.
#[derive(Debug, Clone)]
pub enum Stager {
  /// Built-in gzip/tar extraction.
  Builtin,
  /// External command reading the archive on stdin.
  Command {
    command: String,
    shell: Option<String>,
    timeout: Option<Duration>,
  },
}

impl Stager {
  pub fn from_config(config: &PipelineConfig) -> Self {
    match &config.extraction {
      Extraction::Builtin => Self::Builtin,
      Extraction::Command(command) => Self::Command {
        command: command.clone(),
        shell: config.toolchain.shell.clone(),
        timeout: config.toolchain.timeout,
      },
    }
  }

  /// Materialize `bytes` at `dest`, replacing whatever was there.
  ///
  /// Short-circuiting an already staged tree is the caller's decision; this
  /// always extracts.
  pub async fn stage(&self, bytes: Vec<u8>, dest: &Path, pin: &SourcePin) -> Result<StagedTree, StageError> {
    let parent = dest.parent().ok_or_else(|| StageError::CreateDir {
      path: dest.to_path_buf(),
      source: io::Error::other("destination has no parent directory"),
    })?;
    std::fs::create_dir_all(parent).map_err(|source| StageError::CreateDir {
      path: parent.to_path_buf(),
      source,
    })?;

    if let Err(e) = remove_partials(dest) {
      warn!(error = %e, "failed to remove stale partial directories");
    }

    let name = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let partial = tempfile::Builder::new()
      .prefix(&format!("{PARTIAL_PREFIX}{name}"))
      .tempdir_in(parent)
      .map_err(|source| StageError::CreateDir {
        path: parent.to_path_buf(),
        source,
      })?;

    let sha256 = hash_bytes(&bytes);
    let strip = pin.strip_components;
    info!(dest = %dest.display(), strip, size = bytes.len(), "staging archive");

    let stats = match self {
      Self::Builtin => {
        let target = partial.path().to_path_buf();
        tokio::task::spawn_blocking(move || extract_archive(&bytes, &target, strip))
          .await
          .map_err(|e| StageError::Task(e.to_string()))??
      }
      Self::Command {
        command,
        shell,
        timeout,
      } => run_extract_command(command, shell.as_deref(), *timeout, &bytes, partial.path(), strip).await?,
    };

    if stats.entries == 0 {
      return Err(StageError::Empty { strip });
    }

    let marker = StageMarker {
      version: MARKER_VERSION,
      pin: pin.clone(),
      sha256: sha256.0,
      entries: stats.entries,
      staged_at_unix_nanos: unix_nanos(),
    };
    write_marker(partial.path(), &marker)?;

    if remove_dir_if_exists(dest).map_err(|source| StageError::Replace {
      path: dest.to_path_buf(),
      source,
    })? {
      debug!(dest = %dest.display(), "replaced previous staged tree");
    }

    // The TempDir guard is dropped after the rename; its cleanup then finds
    // nothing to delete.
    std::fs::rename(partial.path(), dest).map_err(|source| StageError::Replace {
      path: dest.to_path_buf(),
      source,
    })?;

    info!(dest = %dest.display(), entries = stats.entries, skipped = stats.skipped, "staging complete");

    Ok(StagedTree {
      root: dest.to_path_buf(),
      marker,
      skipped: stats.skipped,
    })
  }
}

fn unix_nanos() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos() as u64)
    .unwrap_or_default()
}

fn write_marker(root: &Path, marker: &StageMarker) -> Result<(), StageError> {
  let path = root.join(STAGE_MARKER);
  let content = serde_json::to_string_pretty(marker).map_err(|e| StageError::Marker {
    path: path.clone(),
    message: e.to_string(),
  })?;
  std::fs::write(&path, format!("{content}\n")).map_err(|source| StageError::Write { path, source })
}

async fn run_extract_command(
  command: &str,
  shell: Option<&str>,
  timeout: Option<Duration>,
  bytes: &[u8],
  dest: &Path,
  strip: usize,
) -> Result<ExtractStats, StageError> {
  let dest_str = dest.to_string_lossy();
  let cmd = command.replace("{dest}", &dest_str).replace("{strip}", &strip.to_string());

  let mut env = std::collections::BTreeMap::new();
  env.insert("PINBUILD_DEST".to_string(), dest_str.to_string());
  env.insert("PINBUILD_STRIP".to_string(), strip.to_string());

  let output = run_shell(ShellCommand {
    cmd: &cmd,
    cwd: dest.parent(),
    env,
    stdin: Some(bytes),
    shell,
    timeout,
  })
  .await?;

  if !output.success() {
    return Err(StageError::CommandFailed {
      cmd,
      code: output.code,
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    });
  }

  // The external tool is trusted with traversal checks; we only count results.
  let entries = WalkDir::new(dest).min_depth(1).into_iter().filter_map(Result::ok).count();
  Ok(ExtractStats { entries, skipped: 0 })
}

/// Unpack gzip-compressed or plain tar bytes into `dest`.
fn extract_archive(bytes: &[u8], dest: &Path, strip: usize) -> Result<ExtractStats, StageError> {
  if bytes.starts_with(&GZIP_MAGIC) {
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(bytes)));
    let stats = unpack_entries(&mut archive, dest, strip)?;
    // Drain the rest of the stream so a truncated gzip trailer is detected.
    io::copy(&mut archive.into_inner(), &mut io::sink()).map_err(archive_err)?;
    Ok(stats)
  } else {
    let mut archive = Archive::new(BufReader::new(bytes));
    unpack_entries(&mut archive, dest, strip)
  }
}

fn archive_err(e: io::Error) -> StageError {
  StageError::Archive(e.to_string())
}

/// Data errors surface through the entry reader; keep them apart from real write failures.
fn unpack_err(path: &Path, e: io::Error) -> StageError {
  match e.kind() {
    io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => archive_err(e),
    _ => StageError::Write {
      path: path.to_path_buf(),
      source: e,
    },
  }
}

fn unpack_entries<R: Read>(archive: &mut Archive<R>, dest: &Path, strip: usize) -> Result<ExtractStats, StageError> {
  let mut stats = ExtractStats::default();
  // Staged files are newer than any artifact built from an earlier tree, so
  // incremental build tools see them as changed.
  archive.set_preserve_mtime(false);
  let root = dunce::canonicalize(dest).map_err(|e| unpack_err(dest, e))?;

  for entry in archive.entries().map_err(archive_err)? {
    let mut entry = entry.map_err(archive_err)?;
    let kind = entry.header().entry_type();

    if matches!(
      kind,
      EntryType::XGlobalHeader | EntryType::XHeader | EntryType::GNULongName | EntryType::GNULongLink
    ) {
      continue;
    }

    let path = entry.path().map_err(archive_err)?.into_owned();
    let Some(relative) = strip_path(&path, strip)? else {
      debug!(entry = %path.display(), "discarding entry above strip depth");
      stats.skipped += 1;
      continue;
    };
    let target = root.join(&relative);

    match kind {
      EntryType::Directory => {
        resolve_in_root(&root, &target, &path)?;
        std::fs::create_dir_all(&target).map_err(|e| unpack_err(&target, e))?;
      }
      EntryType::Symlink => {
        let link = entry
          .link_name()
          .map_err(archive_err)?
          .ok_or_else(|| StageError::Archive(format!("symlink {} has no target", path.display())))?;
        let resolved = resolve_in_root(&root, &target, &path)?;
        check_link_target(&resolved, &link).map_err(|_| StageError::PathTraversal(path.clone()))?;
        create_parent(&target)?;
        entry.unpack(&target).map_err(|e| unpack_err(&target, e))?;
      }
      EntryType::Link => {
        let link = entry
          .link_name()
          .map_err(archive_err)?
          .ok_or_else(|| StageError::Archive(format!("hard link {} has no target", path.display())))?
          .into_owned();
        let source = strip_path(&link, strip)?.ok_or_else(|| {
          StageError::Archive(format!("hard link {} points above strip depth", path.display()))
        })?;
        let source = root.join(&source);
        resolve_in_root(&root, &source, &path)?;
        resolve_in_root(&root, &target, &path)?;
        create_parent(&target)?;
        std::fs::hard_link(&source, &target).map_err(|e| unpack_err(&target, e))?;
      }
      EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
        resolve_in_root(&root, &target, &path)?;
        create_parent(&target)?;
        entry.unpack(&target).map_err(|e| unpack_err(&target, e))?;
      }
      other => {
        debug!(entry = %path.display(), kind = ?other, "skipping unsupported entry type");
        stats.skipped += 1;
        continue;
      }
    }

    stats.entries += 1;
  }

  Ok(stats)
}

fn create_parent(target: &Path) -> Result<(), StageError> {
  if let Some(parent) = target.parent() {
    std::fs::create_dir_all(parent).map_err(|e| unpack_err(parent, e))?;
  }
  Ok(())
}

/// Locate `target` relative to the canonical `root` as the filesystem sees it.
///
/// Symlinks unpacked earlier from the same archive can redirect a parent
/// directory, so the deepest existing ancestor is canonicalized and must stay
/// under `root`. Missing segments below it are created as plain directories.
fn resolve_in_root(root: &Path, target: &Path, entry: &Path) -> Result<PathBuf, StageError> {
  let traversal = || StageError::PathTraversal(entry.to_path_buf());
  let (Some(parent), Some(name)) = (target.parent(), target.file_name()) else {
    return Err(traversal());
  };

  let mut existing = parent;
  while !existing.exists() {
    existing = existing.parent().ok_or_else(traversal)?;
  }
  let resolved = dunce::canonicalize(existing).map_err(|e| unpack_err(existing, e))?;
  let inside = resolved.strip_prefix(root).map_err(|_| traversal())?;
  let missing = parent.strip_prefix(existing).map_err(|_| traversal())?;

  Ok(inside.join(missing).join(name))
}

/// Remove the first `strip` normal segments of an archive path.
///
/// Returns `None` for entries at or above the strip depth. Absolute paths and
/// `..` segments are rejected outright.
fn strip_path(path: &Path, strip: usize) -> Result<Option<PathBuf>, StageError> {
  let mut segments = Vec::new();
  for component in path.components() {
    match component {
      Component::Normal(segment) => segments.push(segment),
      Component::CurDir => {}
      Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
        return Err(StageError::PathTraversal(path.to_path_buf()));
      }
    }
  }

  if segments.len() <= strip {
    return Ok(None);
  }
  Ok(Some(segments[strip..].iter().collect()))
}

/// Verify a symlink at `entry` (relative to the destination) resolves inside it.
fn check_link_target(entry: &Path, target: &Path) -> Result<(), ()> {
  let mut depth: isize = entry.parent().map_or(0, |p| p.components().count() as isize);
  for component in target.components() {
    match component {
      Component::Normal(_) => depth += 1,
      Component::CurDir => {}
      Component::ParentDir => {
        depth -= 1;
        if depth < 0 {
          return Err(());
        }
      }
      Component::RootDir | Component::Prefix(_) => return Err(()),
    }
  }
  Ok(())
}
