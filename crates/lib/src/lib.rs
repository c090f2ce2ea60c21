//! stateplane-lib: state tracking and reconciliation for a hosted data platform
//!
//! This crate keeps a versioned record of the resources deployed on the
//! platform (projects, datasets, recipes) and compares it with what is live:
//! - `Resource` / `ResourceId`: one tracked item and its stable identity
//! - `State`: the versioned snapshot of one environment
//! - `StateBackend`: persistence with exclusive environment locking
//! - `ResourceSynchronizer`: reads one resource type from the platform
//! - `compute_diff`: the delta between two snapshots
//! - `StateManager`: the orchestration of all of the above

pub mod backend;
pub mod config;
pub mod consts;
pub mod diff;
pub mod manager;
pub mod paths;
pub mod resource;
pub mod state;
pub mod sync;
pub mod util;

pub use backend::{LocalFileBackend, MemoryBackend, StateBackend, StateError};
pub use config::ManagerConfig;
pub use diff::{ChangeKind, ResourceDiff, StateDiff, compute_diff};
pub use manager::{ManagerError, StateManager};
pub use resource::{Attributes, Resource, ResourceError, ResourceId};
pub use state::State;
pub use sync::{PlatformClient, ResourceSynchronizer, SyncError, SynchronizerRegistry};
