//! State manager configuration.
//!
//! Every field has a default; [`ManagerConfig::from_env`] overrides them from
//! `STATEPLANE_*` environment variables:
//!
//! | variable                        | field          |
//! |---------------------------------|----------------|
//! | `STATEPLANE_ENV`                | `environment`  |
//! | `STATEPLANE_ACTOR`              | `actor`        |
//! | `STATEPLANE_STATE_DIR`          | `state_dir`    |
//! | `STATEPLANE_LOCK_TIMEOUT_SECS`  | `lock_timeout` |
//! | `STATEPLANE_PARALLELISM`        | `parallelism`  |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::consts::{DEFAULT_ENVIRONMENT, DEFAULT_LOCK_TIMEOUT_SECS, DEFAULT_PARALLELISM};
use crate::paths;

pub const ENV_ENVIRONMENT: &str = "STATEPLANE_ENV";
pub const ENV_ACTOR: &str = "STATEPLANE_ACTOR";
pub const ENV_STATE_DIR: &str = "STATEPLANE_STATE_DIR";
pub const ENV_LOCK_TIMEOUT_SECS: &str = "STATEPLANE_LOCK_TIMEOUT_SECS";
pub const ENV_PARALLELISM: &str = "STATEPLANE_PARALLELISM";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("invalid value '{value}' for {var}: {reason}")]
  InvalidValue {
    var: &'static str,
    value: String,
    reason: String,
  },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
  /// Environment the state belongs to, e.g. `prod`.
  pub environment: String,
  /// Recorded as `deployedBy` on synced resources and as the lock holder.
  pub actor: String,
  /// Directory of the local-file backend.
  pub state_dir: PathBuf,
  /// How long to wait for the environment lock. Zero means a single attempt.
  pub lock_timeout: Duration,
  /// Maximum number of concurrent remote calls during a sync.
  pub parallelism: usize,
}

impl Default for ManagerConfig {
  fn default() -> Self {
    Self {
      environment: DEFAULT_ENVIRONMENT.to_string(),
      actor: default_actor(),
      state_dir: paths::state_dir(),
      lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
      parallelism: DEFAULT_PARALLELISM,
    }
  }
}

impl ManagerConfig {
  pub fn new(environment: impl Into<String>) -> Self {
    Self {
      environment: environment.into(),
      ..Self::default()
    }
  }

  /// Defaults overridden by any `STATEPLANE_*` variables that are set.
  pub fn from_env() -> Result<Self, ConfigError> {
    let mut config = Self::default();

    if let Some(environment) = non_empty_var(ENV_ENVIRONMENT) {
      config.environment = environment;
    }
    if let Some(actor) = non_empty_var(ENV_ACTOR) {
      config.actor = actor;
    }
    if let Some(dir) = non_empty_var(ENV_STATE_DIR) {
      config.state_dir = PathBuf::from(dir);
    }
    if let Some(secs) = parse_var::<u64>(ENV_LOCK_TIMEOUT_SECS)? {
      config.lock_timeout = Duration::from_secs(secs);
    }
    if let Some(parallelism) = parse_var::<usize>(ENV_PARALLELISM)? {
      if parallelism == 0 {
        return Err(ConfigError::InvalidValue {
          var: ENV_PARALLELISM,
          value: parallelism.to_string(),
          reason: "must be at least 1".to_string(),
        });
      }
      config.parallelism = parallelism;
    }

    Ok(config)
  }

  pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
    self.actor = actor.into();
    self
  }

  pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.state_dir = dir.into();
    self
  }

  pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
    self.lock_timeout = timeout;
    self
  }

  /// Set the fetch bound; values below 1 are raised to 1.
  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism.max(1);
    self
  }
}

/// The login name of the current user.
pub fn default_actor() -> String {
  whoami::username()
}

fn non_empty_var(var: &str) -> Option<String> {
  std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match non_empty_var(var) {
    None => Ok(None),
    Some(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError::InvalidValue {
      var,
      value: raw.clone(),
      reason: e.to_string(),
    }),
  }
}
