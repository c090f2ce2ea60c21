//! State persistence.
//!
//! A [`StateBackend`] stores the state document of exactly one environment.
//! Two implementations ship with the crate:
//!
//! - [`LocalFileBackend`]: a JSON file on disk, written atomically, guarded
//!   by an OS advisory lock
//! - [`MemoryBackend`]: an in-process store whose lock is a conditional write
//!   into a lock table, the model for shared backends

pub mod local;
pub mod lock;
pub mod memory;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::state::{DocumentError, State};

pub use local::LocalFileBackend;
pub use lock::FileLock;
pub use memory::MemoryBackend;

/// Errors raised by state backends.
#[derive(Debug, Error)]
pub enum StateError {
  /// Nothing has been persisted yet.
  #[error("no state found at {location}")]
  NotFound { location: String },

  /// The persisted document cannot be parsed or fails validation.
  #[error("state at {location} is corrupted: {reason}")]
  Corrupted { location: String, reason: String },

  #[error("failed to read state at {location}: {source}")]
  Read {
    location: String,
    #[source]
    source: io::Error,
  },

  /// The write failed; the previously persisted document is untouched.
  #[error("failed to write state at {location}: {source}")]
  Write {
    location: String,
    #[source]
    source: io::Error,
  },

  #[error("state for environment '{environment}' is locked by {holder} since {since}")]
  LockHeld {
    environment: String,
    holder: String,
    since: String,
  },

  #[error(
    "timed out after {waited:?} waiting for the state lock of environment '{environment}': held by {holder} since {since}"
  )]
  LockTimeout {
    environment: String,
    holder: String,
    since: String,
    waited: Duration,
  },

  /// Locking failed for a reason other than contention.
  #[error("failed to acquire state lock at {location}: {source}")]
  Lock {
    location: String,
    #[source]
    source: io::Error,
  },

  /// The state was not derived from the persisted revision and does not supersede it.
  #[error("stale state: serial {attempted} does not supersede persisted serial {persisted}")]
  Stale { persisted: u64, attempted: u64 },

  #[error("invalid environment name '{0}': use letters, digits, '-' or '_'")]
  InvalidEnvironment(String),
}

impl StateError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, StateError::NotFound { .. })
  }

  pub fn is_lock_contention(&self) -> bool {
    matches!(self, StateError::LockHeld { .. } | StateError::LockTimeout { .. })
  }

  pub(crate) fn corrupted(location: &str, err: DocumentError) -> Self {
    StateError::Corrupted {
      location: location.to_string(),
      reason: err.to_string(),
    }
  }

  /// Contention error for a lock that stayed busy for `waited`.
  pub(crate) fn contention(environment: &str, holder: Option<&LockInfo>, waited: Duration) -> Self {
    let (holder, since) = match holder {
      Some(info) => (info.describe_holder(), info.acquired_at.to_rfc3339()),
      None => ("an unknown holder".to_string(), "an unknown time".to_string()),
    };
    if waited.is_zero() {
      StateError::LockHeld {
        environment: environment.to_string(),
        holder,
        since,
      }
    } else {
      StateError::LockTimeout {
        environment: environment.to_string(),
        holder,
        since,
        waited,
      }
    }
  }
}

/// Who holds an environment lock, and since when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
  pub version: u32,
  pub holder: String,
  pub pid: u32,
  pub acquired_at: DateTime<Utc>,
  pub environment: String,
}

impl LockInfo {
  pub fn new(holder: &str, environment: &str) -> Self {
    Self {
      version: 1,
      holder: holder.to_string(),
      pid: std::process::id(),
      acquired_at: Utc::now(),
      environment: environment.to_string(),
    }
  }

  pub fn describe_holder(&self) -> String {
    format!("{} (PID {})", self.holder, self.pid)
  }
}

/// A held environment lock. Dropping the guard releases the lock.
pub trait StateLockGuard: Send {
  fn info(&self) -> &LockInfo;
}

/// Persistence contract for one environment's state.
pub trait StateBackend: Send + Sync {
  /// Load the persisted state.
  ///
  /// Fails with [`StateError::NotFound`] when nothing was saved yet and with
  /// [`StateError::Corrupted`] when the document is unusable.
  fn load(&self) -> Result<State, StateError>;

  /// Persist `state`, backing up the outgoing document first.
  fn save(&self, state: &State) -> Result<(), StateError>;

  fn exists(&self) -> bool;

  fn delete(&self) -> Result<(), StateError>;

  /// Copy the current document aside under `suffix`, returning the copy's location.
  fn backup(&self, suffix: &str) -> Result<PathBuf, StateError>;

  /// Acquire the exclusive environment lock, waiting at most `timeout`.
  fn lock(&self, holder: &str, timeout: Duration) -> Result<Box<dyn StateLockGuard>, StateError>;

  /// Human-readable location, used in logs and errors.
  fn location(&self) -> String;
}

/// Backup suffix naming the serial of an outgoing document.
pub(crate) fn backup_suffix_for(raw: &str) -> String {
  serde_json::from_str::<Value>(raw)
    .ok()
    .and_then(|doc| doc.get("serial").and_then(Value::as_u64))
    .map(|serial| format!("serial-{}", serial))
    .unwrap_or_else(|| format!("unreadable-{}", Utc::now().timestamp()))
}

/// Environment names become file names, so keep them to a safe alphabet.
pub(crate) fn validate_environment(environment: &str) -> Result<(), StateError> {
  let valid = !environment.is_empty()
    && environment
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
  if valid {
    Ok(())
  } else {
    Err(StateError::InvalidEnvironment(environment.to_string()))
  }
}
