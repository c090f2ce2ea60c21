//! Local-file state backend.
//!
//! # Storage Layout
//!
//! ```text
//! {state_dir}/
//! ├── prod.state.json                    # current document
//! ├── prod.state.json.serial-41.backup   # outgoing document of each save
//! └── prod.state.lock                    # advisory lock + holder metadata
//! ```
//!
//! Every save keeps the outgoing document as a backup. Backups are never
//! removed implicitly; call [`LocalFileBackend::prune_backups`] to cap them.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::lock::FileLock;
use super::{StateBackend, StateError, StateLockGuard, backup_suffix_for, validate_environment};
use crate::consts::{BACKUP_FILE_SUFFIX, LOCK_FILE_SUFFIX, STATE_FILE_SUFFIX};
use crate::state::{State, parse_document};

/// Stores one environment's state as a JSON file.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so a crash mid-write never leaves a partial document.
#[derive(Debug, Clone)]
pub struct LocalFileBackend {
  dir: PathBuf,
  environment: String,
  path: PathBuf,
  lock_path: PathBuf,
}

impl LocalFileBackend {
  /// Create a backend for `environment` under `dir`, creating `dir` if needed.
  pub fn new(dir: impl Into<PathBuf>, environment: &str) -> Result<Self, StateError> {
    validate_environment(environment)?;
    let dir = dir.into();
    let path = dir.join(format!("{}.{}", environment, STATE_FILE_SUFFIX));
    let lock_path = dir.join(format!("{}.{}", environment, LOCK_FILE_SUFFIX));

    fs::create_dir_all(&dir).map_err(|source| StateError::Write {
      location: dir.display().to_string(),
      source,
    })?;

    Ok(Self {
      dir,
      environment: environment.to_string(),
      path,
      lock_path,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  pub fn environment(&self) -> &str {
    &self.environment
  }

  fn backup_path(&self, suffix: &str) -> PathBuf {
    let file_name = self
      .path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    self.dir.join(format!("{}.{}.{}", file_name, suffix, BACKUP_FILE_SUFFIX))
  }

  fn write_error(&self, source: io::Error) -> StateError {
    StateError::Write {
      location: self.location(),
      source,
    }
  }

  fn read_raw(&self) -> Result<String, StateError> {
    fs::read_to_string(&self.path).map_err(|source| {
      if source.kind() == io::ErrorKind::NotFound {
        StateError::NotFound {
          location: self.location(),
        }
      } else {
        StateError::Read {
          location: self.location(),
          source,
        }
      }
    })
  }

  /// Replace the target with `content` via temp file + rename.
  fn write_atomic(&self, content: &str) -> Result<(), StateError> {
    let mut temp = NamedTempFile::new_in(&self.dir).map_err(|e| self.write_error(e))?;
    temp.write_all(content.as_bytes()).map_err(|e| self.write_error(e))?;
    temp.as_file().sync_all().map_err(|e| self.write_error(e))?;
    temp.persist(&self.path).map_err(|e| self.write_error(e.error))?;
    Ok(())
  }

  /// Backups of this environment's document, oldest first.
  pub fn list_backups(&self) -> Result<Vec<PathBuf>, StateError> {
    let prefix = format!(
      "{}.",
      self.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    );
    let suffix = format!(".{}", BACKUP_FILE_SUFFIX);

    let entries = fs::read_dir(&self.dir).map_err(|source| StateError::Read {
      location: self.dir.display().to_string(),
      source,
    })?;

    let mut backups: Vec<(SystemTime, PathBuf)> = entries
      .filter_map(Result::ok)
      .filter(|entry| {
        let name = entry.file_name().to_string_lossy().into_owned();
        name.starts_with(&prefix) && name.ends_with(&suffix)
      })
      .map(|entry| {
        let modified = entry
          .metadata()
          .and_then(|m| m.modified())
          .unwrap_or(SystemTime::UNIX_EPOCH);
        (modified, entry.path())
      })
      .collect();
    backups.sort();

    Ok(backups.into_iter().map(|(_, path)| path).collect())
  }

  /// Delete all but the `keep` most recent backups, returning the removed paths.
  pub fn prune_backups(&self, keep: usize) -> Result<Vec<PathBuf>, StateError> {
    let backups = self.list_backups()?;
    let excess = backups.len().saturating_sub(keep);
    let removed: Vec<PathBuf> = backups.into_iter().take(excess).collect();

    for path in &removed {
      fs::remove_file(path).map_err(|source| StateError::Write {
        location: path.display().to_string(),
        source,
      })?;
    }
    if !removed.is_empty() {
      info!(removed = removed.len(), kept = keep, "pruned state backups");
    }
    Ok(removed)
  }

  /// Replace the current document with a validated backup.
  ///
  /// The document being replaced is itself backed up first.
  pub fn restore_backup(&self, backup: &Path) -> Result<State, StateError> {
    let location = backup.display().to_string();
    let raw = fs::read_to_string(backup).map_err(|source| {
      if source.kind() == io::ErrorKind::NotFound {
        StateError::NotFound {
          location: location.clone(),
        }
      } else {
        StateError::Read {
          location: location.clone(),
          source,
        }
      }
    })?;
    let state = parse_document(&raw).map_err(|e| StateError::corrupted(&location, e))?;

    if self.exists() {
      self.backup(&format!("pre-restore-{}", Utc::now().timestamp()))?;
    }
    self.write_atomic(&raw)?;

    info!(backup = %location, serial = state.serial(), "restored state from backup");
    Ok(state)
  }
}

impl StateBackend for LocalFileBackend {
  fn load(&self) -> Result<State, StateError> {
    let raw = self.read_raw()?;
    let state = parse_document(&raw).map_err(|e| StateError::corrupted(&self.location(), e))?;
    debug!(path = %self.path.display(), serial = state.serial(), "loaded state");
    Ok(state)
  }

  fn save(&self, state: &State) -> Result<(), StateError> {
    fs::create_dir_all(&self.dir).map_err(|e| self.write_error(e))?;

    if self.path.exists() {
      let suffix = match fs::read_to_string(&self.path) {
        Ok(raw) => backup_suffix_for(&raw),
        Err(_) => backup_suffix_for(""),
      };
      self.backup(&suffix)?;
    }

    let content = state.to_json().map_err(|e| self.write_error(io::Error::other(e)))?;
    self.write_atomic(&content)?;

    debug!(path = %self.path.display(), serial = state.serial(), resources = state.len(), "saved state");
    Ok(())
  }

  fn exists(&self) -> bool {
    self.path.is_file()
  }

  fn delete(&self) -> Result<(), StateError> {
    match fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(self.write_error(e)),
    }
  }

  fn backup(&self, suffix: &str) -> Result<PathBuf, StateError> {
    if !self.exists() {
      return Err(StateError::NotFound {
        location: self.location(),
      });
    }
    let target = self.backup_path(suffix);
    fs::copy(&self.path, &target).map_err(|source| StateError::Write {
      location: target.display().to_string(),
      source,
    })?;
    debug!(backup = %target.display(), "backed up state");
    Ok(target)
  }

  fn lock(&self, holder: &str, timeout: Duration) -> Result<Box<dyn StateLockGuard>, StateError> {
    let lock = FileLock::acquire(&self.lock_path, &self.environment, holder, timeout)?;
    Ok(Box::new(lock))
  }

  fn location(&self) -> String {
    self.path.display().to_string()
  }
}
