//! In-process state backend.
//!
//! Clones of a [`MemoryBackend`] share one store, which makes it usable as a
//! stand-in for a shared remote backend: the document is kept serialized and
//! re-validated on every load, and the lock is a conditional write into a
//! lock table entry that only succeeds while the entry is empty.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use super::lock::wait_for_lock;
use super::{LockInfo, StateBackend, StateError, StateLockGuard, backup_suffix_for, validate_environment};
use crate::state::{State, parse_document};

#[derive(Debug, Default)]
struct Store {
  document: Option<String>,
  backups: BTreeMap<String, String>,
  lock: Option<(u64, LockInfo)>,
  next_token: u64,
}

/// Shared in-memory storage for one environment.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
  environment: String,
  store: Arc<Mutex<Store>>,
}

impl MemoryBackend {
  pub fn new(environment: &str) -> Result<Self, StateError> {
    validate_environment(environment)?;
    Ok(Self {
      environment: environment.to_string(),
      store: Arc::new(Mutex::new(Store::default())),
    })
  }

  fn store(&self) -> MutexGuard<'_, Store> {
    self.store.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// The raw persisted document, if any.
  pub fn raw_document(&self) -> Option<String> {
    self.store().document.clone()
  }

  /// Replace the raw persisted document without validation.
  pub fn put_raw_document(&self, raw: impl Into<String>) {
    self.store().document = Some(raw.into());
  }

  /// Suffixes of the stored backups, in lexical order.
  pub fn backup_suffixes(&self) -> Vec<String> {
    self.store().backups.keys().cloned().collect()
  }

  pub fn backup_document(&self, suffix: &str) -> Option<String> {
    self.store().backups.get(suffix).cloned()
  }

  /// The current lock holder, if the lock is taken.
  pub fn lock_holder(&self) -> Option<LockInfo> {
    self.store().lock.as_ref().map(|(_, info)| info.clone())
  }

  fn backup_location(&self, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}/{}", self.location(), suffix))
  }
}

impl StateBackend for MemoryBackend {
  fn load(&self) -> Result<State, StateError> {
    let raw = self.raw_document().ok_or_else(|| StateError::NotFound {
      location: self.location(),
    })?;
    parse_document(&raw).map_err(|e| StateError::corrupted(&self.location(), e))
  }

  fn save(&self, state: &State) -> Result<(), StateError> {
    let content = state.to_json().map_err(|e| StateError::Write {
      location: self.location(),
      source: std::io::Error::other(e),
    })?;

    let mut store = self.store();
    if let Some(outgoing) = store.document.take() {
      let suffix = backup_suffix_for(&outgoing);
      store.backups.insert(suffix, outgoing);
    }
    store.document = Some(content);

    debug!(location = %self.location(), serial = state.serial(), "saved state");
    Ok(())
  }

  fn exists(&self) -> bool {
    self.store().document.is_some()
  }

  fn delete(&self) -> Result<(), StateError> {
    self.store().document = None;
    Ok(())
  }

  fn backup(&self, suffix: &str) -> Result<PathBuf, StateError> {
    let mut store = self.store();
    let document = store.document.clone().ok_or_else(|| StateError::NotFound {
      location: self.location(),
    })?;
    store.backups.insert(suffix.to_string(), document);
    Ok(self.backup_location(suffix))
  }

  fn lock(&self, holder: &str, timeout: Duration) -> Result<Box<dyn StateLockGuard>, StateError> {
    let guard = wait_for_lock(
      &self.environment,
      timeout,
      || {
        let mut store = self.store();
        if store.lock.is_some() {
          return Ok(None);
        }
        store.next_token += 1;
        let token = store.next_token;
        let info = LockInfo::new(holder, &self.environment);
        store.lock = Some((token, info.clone()));
        Ok(Some(MemoryLockGuard {
          store: Arc::clone(&self.store),
          token,
          info,
        }))
      },
      || self.lock_holder(),
    )?;
    Ok(Box::new(guard))
  }

  fn location(&self) -> String {
    format!("memory://{}", self.environment)
  }
}

/// Lock table entry held by one caller; cleared on drop.
#[derive(Debug)]
struct MemoryLockGuard {
  store: Arc<Mutex<Store>>,
  token: u64,
  info: LockInfo,
}

impl StateLockGuard for MemoryLockGuard {
  fn info(&self) -> &LockInfo {
    &self.info
  }
}

impl Drop for MemoryLockGuard {
  fn drop(&mut self) {
    let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
    if matches!(store.lock, Some((token, _)) if token == self.token) {
      store.lock = None;
    }
  }
}
