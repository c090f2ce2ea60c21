//! Resource synchronizers.
//!
//! One [`ResourceSynchronizer`] per resource type knows how to read that
//! type from the remote platform and normalize it into a [`Resource`]. The
//! [`SynchronizerRegistry`] maps type tags to synchronizers, so supporting a
//! new resource type means registering one more implementation.

pub mod client;
pub mod dataset;
pub mod project;
pub mod recipe;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::resource::{Resource, ResourceError, ResourceId};

pub use client::{ClientError, PlatformClient};
pub use dataset::DatasetSynchronizer;
pub use project::ProjectSynchronizer;
pub use recipe::RecipeSynchronizer;

/// Errors raised while reading resources from the remote platform.
#[derive(Debug, Error)]
pub enum SyncError {
  /// The platform has no item behind this id.
  #[error("resource not found on the platform: {0}")]
  ResourceNotFound(String),

  #[error("listing {resource_type} resources requires a container key")]
  MissingContainer { resource_type: String },

  #[error("no synchronizer registered for resource type '{0}'")]
  UnknownResourceType(String),

  #[error("no container resource type is registered")]
  NoContainerType,

  #[error("'{id}' does not address a single {resource_type} resource")]
  InvalidTarget { id: String, resource_type: String },

  #[error("unexpected platform response for {id}: {reason}")]
  InvalidResponse { id: String, reason: String },

  #[error("platform request for {target} failed: {source}")]
  Remote {
    target: String,
    #[source]
    source: ClientError,
  },

  #[error(transparent)]
  InvalidId(#[from] ResourceError),

  #[error("synchronization task failed: {0}")]
  Task(String),
}

impl SyncError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, SyncError::ResourceNotFound(_))
  }

  pub(crate) fn remote(target: impl fmt::Display, source: ClientError) -> Self {
    SyncError::Remote {
      target: target.to_string(),
      source,
    }
  }
}

/// Reads one resource type from the remote platform.
pub trait ResourceSynchronizer: Send + Sync {
  /// Type tag handled by this synchronizer, e.g. `dataset`.
  fn resource_type(&self) -> &str;

  /// Whether listing needs a container key.
  fn requires_container(&self) -> bool {
    true
  }

  /// Fetch the live revision of one resource.
  fn fetch(&self, id: &ResourceId) -> Result<Resource, SyncError>;

  /// Ids of every live resource of this type, optionally scoped to a container.
  fn list_ids(&self, container: Option<&str>) -> Result<Vec<ResourceId>, SyncError>;

  /// Fetch every live resource of this type.
  ///
  /// Items deleted between listing and fetching are skipped.
  fn list_all(&self, container: Option<&str>) -> Result<Vec<Resource>, SyncError> {
    let mut resources = Vec::new();
    for id in self.list_ids(container)? {
      match self.fetch(&id) {
        Ok(resource) => resources.push(resource),
        Err(e) if e.is_not_found() => warn!(id = %id, "resource vanished while listing"),
        Err(e) => return Err(e),
      }
    }
    Ok(resources)
  }
}

/// Type tag → synchronizer table.
#[derive(Clone, Default)]
pub struct SynchronizerRegistry {
  synchronizers: BTreeMap<String, Arc<dyn ResourceSynchronizer>>,
  container_type: Option<String>,
}

impl SynchronizerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry with the project, dataset and recipe synchronizers.
  pub fn with_platform_defaults(client: Arc<dyn PlatformClient>, actor: &str) -> Self {
    let mut registry = Self::new();
    registry.register_container(Arc::new(ProjectSynchronizer::new(Arc::clone(&client), actor)));
    registry.register(Arc::new(DatasetSynchronizer::new(Arc::clone(&client), actor)));
    registry.register(Arc::new(RecipeSynchronizer::new(client, actor)));
    registry
  }

  /// Register a synchronizer, replacing any previous one for the same type.
  pub fn register(&mut self, synchronizer: Arc<dyn ResourceSynchronizer>) -> Option<Arc<dyn ResourceSynchronizer>> {
    self
      .synchronizers
      .insert(synchronizer.resource_type().to_string(), synchronizer)
  }

  /// Register the synchronizer of the container type.
  pub fn register_container(&mut self, synchronizer: Arc<dyn ResourceSynchronizer>) {
    self.container_type = Some(synchronizer.resource_type().to_string());
    self.register(synchronizer);
  }

  pub fn get(&self, resource_type: &str) -> Option<&Arc<dyn ResourceSynchronizer>> {
    self.synchronizers.get(resource_type)
  }

  pub fn container(&self) -> Option<&Arc<dyn ResourceSynchronizer>> {
    self.container_type.as_deref().and_then(|t| self.get(t))
  }

  /// Synchronizers of every type scoped to a container.
  pub fn children(&self) -> impl Iterator<Item = &Arc<dyn ResourceSynchronizer>> {
    self
      .synchronizers
      .iter()
      .filter(|(t, _)| Some(t.as_str()) != self.container_type.as_deref())
      .map(|(_, s)| s)
  }

  pub fn types(&self) -> impl Iterator<Item = &str> {
    self.synchronizers.keys().map(String::as_str)
  }
}

impl fmt::Debug for SynchronizerRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SynchronizerRegistry")
      .field("types", &self.synchronizers.keys().collect::<Vec<_>>())
      .field("container_type", &self.container_type)
      .finish()
  }
}

/// Unwrap a required container key.
pub(crate) fn require_container<'a>(resource_type: &str, container: Option<&'a str>) -> Result<&'a str, SyncError> {
  container.ok_or_else(|| SyncError::MissingContainer {
    resource_type: resource_type.to_string(),
  })
}

/// Name segment of a child resource id.
pub(crate) fn require_name<'a>(resource_type: &str, id: &'a ResourceId) -> Result<&'a str, SyncError> {
  if id.resource_type() != resource_type {
    return Err(SyncError::InvalidTarget {
      id: id.to_string(),
      resource_type: resource_type.to_string(),
    });
  }
  id.name().ok_or_else(|| SyncError::InvalidTarget {
    id: id.to_string(),
    resource_type: resource_type.to_string(),
  })
}

/// Build child ids from remote names, skipping names the id grammar cannot express.
pub(crate) fn child_ids(resource_type: &str, container: &str, names: Vec<String>) -> Vec<ResourceId> {
  names
    .into_iter()
    .filter_map(|name| match ResourceId::new(resource_type, container, Some(&name)) {
      Ok(id) => Some(id),
      Err(e) => {
        warn!(resource_type, container, name = %name, error = %e, "skipping remote item without a valid id");
        None
      }
    })
    .collect()
}

/// The remote response as a JSON object.
pub(crate) fn expect_object<'a>(id: &ResourceId, value: &'a Value) -> Result<&'a Map<String, Value>, SyncError> {
  value.as_object().ok_or_else(|| SyncError::InvalidResponse {
    id: id.to_string(),
    reason: "expected a JSON object".to_string(),
  })
}

/// Check that the response describes the requested project.
pub(crate) fn check_project_key(id: &ResourceId, object: &Map<String, Value>) -> Result<(), SyncError> {
  match object.get("projectKey").and_then(Value::as_str) {
    Some(key) if key != id.container() => Err(SyncError::InvalidResponse {
      id: id.to_string(),
      reason: format!("response belongs to project '{}'", key),
    }),
    _ => Ok(()),
  }
}
