//! Crate-wide constants.

/// Application name, used for default directories and environment variables.
pub const APP_NAME: &str = "stateplane";

/// Current state document schema version.
pub const STATE_VERSION: u32 = 1;

/// Environment used when none is configured.
pub const DEFAULT_ENVIRONMENT: &str = "default";

/// Extension of persisted state documents.
pub const STATE_FILE_SUFFIX: &str = "state.json";

/// Extension of environment lock files.
pub const LOCK_FILE_SUFFIX: &str = "state.lock";

/// Extension appended to backup copies of the state document.
pub const BACKUP_FILE_SUFFIX: &str = "backup";

/// Default wait for the environment lock.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

/// Interval between non-blocking lock attempts.
pub const LOCK_RETRY_INTERVAL_MS: u64 = 100;

/// Default bound on concurrent remote fetches.
pub const DEFAULT_PARALLELISM: usize = 8;
