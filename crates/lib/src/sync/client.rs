//! Remote platform client contract.
//!
//! The synchronizers never talk to the platform directly; they receive a
//! [`PlatformClient`] handle in their constructor. Implementations wrap
//! whatever transport the platform offers and return the platform's native
//! settings objects as JSON.

use serde_json::Value;
use thiserror::Error;

/// Failures reported by the remote platform client.
///
/// A missing item is not an error: getters return `Ok(None)` for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
  #[error("permission denied: {0}")]
  PermissionDenied(String),

  #[error("transport error: {0}")]
  Transport(String),

  #[error("platform API error ({status}): {message}")]
  Api { status: u16, message: String },
}

/// Read-only access to the remote platform.
///
/// Calls are synchronous; the state manager runs them on blocking worker
/// threads and bounds how many are in flight.
pub trait PlatformClient: Send + Sync {
  /// Keys of every project the client can see.
  fn list_project_keys(&self) -> Result<Vec<String>, ClientError>;

  /// Project summary, e.g. `{"projectKey", "name", "shortDesc", "ownerLogin", "tags"}`.
  fn get_project(&self, project_key: &str) -> Result<Option<Value>, ClientError>;

  /// Names of the datasets in a project.
  fn list_datasets(&self, project_key: &str) -> Result<Vec<String>, ClientError>;

  /// Raw dataset settings, e.g. `{"type", "params", "schema", "formatType", "formatParams", "managed"}`.
  fn get_dataset(&self, project_key: &str, name: &str) -> Result<Option<Value>, ClientError>;

  /// Names of the recipes in a project.
  fn list_recipes(&self, project_key: &str) -> Result<Vec<String>, ClientError>;

  /// Raw recipe definition plus its code payload, e.g.
  /// `{"type", "inputs", "outputs", "params", "payload"}`.
  fn get_recipe(&self, project_key: &str, name: &str) -> Result<Option<Value>, ClientError>;
}
