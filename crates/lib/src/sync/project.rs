//! Project synchronizer.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::{PlatformClient, ResourceSynchronizer, SyncError, check_project_key, expect_object};
use crate::resource::{Attributes, Resource, ResourceId};

pub const PROJECT_TYPE: &str = "project";

/// Reads projects, the container type of the platform.
pub struct ProjectSynchronizer {
  client: Arc<dyn PlatformClient>,
  actor: String,
}

impl ProjectSynchronizer {
  pub fn new(client: Arc<dyn PlatformClient>, actor: &str) -> Self {
    Self {
      client,
      actor: actor.to_string(),
    }
  }
}

impl ResourceSynchronizer for ProjectSynchronizer {
  fn resource_type(&self) -> &str {
    PROJECT_TYPE
  }

  fn requires_container(&self) -> bool {
    false
  }

  fn fetch(&self, id: &ResourceId) -> Result<Resource, SyncError> {
    if id.resource_type() != PROJECT_TYPE || id.name().is_some() {
      return Err(SyncError::InvalidTarget {
        id: id.to_string(),
        resource_type: PROJECT_TYPE.to_string(),
      });
    }

    let key = id.container();
    let raw = self
      .client
      .get_project(key)
      .map_err(|e| SyncError::remote(id, e))?
      .ok_or_else(|| SyncError::ResourceNotFound(id.to_string()))?;

    let object = expect_object(id, &raw)?;
    check_project_key(id, object)?;

    let mut attributes = Attributes::new();
    copy_field(object, "name", &mut attributes, "name");
    copy_field(object, "shortDesc", &mut attributes, "description");
    copy_field(object, "ownerLogin", &mut attributes, "owner");
    if let Some(tags) = object.get("tags").and_then(Value::as_array) {
      let mut tags: Vec<&str> = tags.iter().filter_map(Value::as_str).collect();
      tags.sort_unstable();
      attributes.insert("tags".to_string(), Value::from(tags));
    }

    debug!(id = %id, "fetched project");

    Ok(
      Resource::from_id(PROJECT_TYPE, id.clone(), attributes)?
        .with_deployed_by(&self.actor)
        .with_internal_id(Some(key.to_string())),
    )
  }

  /// Every visible project; the container argument is ignored.
  fn list_ids(&self, _container: Option<&str>) -> Result<Vec<ResourceId>, SyncError> {
    let keys = self
      .client
      .list_project_keys()
      .map_err(|e| SyncError::remote("project list", e))?;

    Ok(
      keys
        .into_iter()
        .filter_map(|key| match ResourceId::new(PROJECT_TYPE, &key, None) {
          Ok(id) => Some(id),
          Err(e) => {
            tracing::warn!(project = %key, error = %e, "skipping project without a valid id");
            None
          }
        })
        .collect(),
    )
  }
}

/// Copy `from` to `to` unless it is absent or null. The value is kept as is.
fn copy_field(object: &serde_json::Map<String, Value>, from: &str, attributes: &mut Attributes, to: &str) {
  if let Some(value) = object.get(from).filter(|v| !v.is_null()) {
    attributes.insert(to.to_string(), value.clone());
  }
}
