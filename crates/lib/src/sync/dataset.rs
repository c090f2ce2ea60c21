//! Dataset synchronizer.
//!
//! Connection parameters are flattened into the top-level attributes so a
//! change such as a renamed table surfaces as a single attribute change.
//! The remaining settings map to fixed attribute names:
//!
//! | settings field  | attribute       |
//! |-----------------|-----------------|
//! | `type`          | `type`          |
//! | `schema.columns`| `columns`       |
//! | `formatType`    | `format_type`   |
//! | `formatParams`  | `format_params` |
//! | `managed`       | `managed`       |

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::{
  PlatformClient, ResourceSynchronizer, SyncError, check_project_key, child_ids, expect_object, require_container,
  require_name,
};
use crate::resource::{Attributes, Resource, ResourceId};

pub const DATASET_TYPE: &str = "dataset";

/// Reads datasets from a project.
pub struct DatasetSynchronizer {
  client: Arc<dyn PlatformClient>,
  actor: String,
}

impl DatasetSynchronizer {
  pub fn new(client: Arc<dyn PlatformClient>, actor: &str) -> Self {
    Self {
      client,
      actor: actor.to_string(),
    }
  }
}

impl ResourceSynchronizer for DatasetSynchronizer {
  fn resource_type(&self) -> &str {
    DATASET_TYPE
  }

  fn fetch(&self, id: &ResourceId) -> Result<Resource, SyncError> {
    let name = require_name(DATASET_TYPE, id)?;
    let project = id.container();

    let raw = self
      .client
      .get_dataset(project, name)
      .map_err(|e| SyncError::remote(id, e))?
      .ok_or_else(|| SyncError::ResourceNotFound(id.to_string()))?;

    let object = expect_object(id, &raw)?;
    check_project_key(id, object)?;

    let attributes = normalize(object);
    debug!(id = %id, attributes = attributes.len(), "fetched dataset");

    Ok(
      Resource::from_id(DATASET_TYPE, id.clone(), attributes)?
        .with_deployed_by(&self.actor)
        .with_internal_id(Some(format!("{}.{}", project, name))),
    )
  }

  fn list_ids(&self, container: Option<&str>) -> Result<Vec<ResourceId>, SyncError> {
    let project = require_container(DATASET_TYPE, container)?;
    let names = self
      .client
      .list_datasets(project)
      .map_err(|e| SyncError::remote(format!("datasets of {}", project), e))?;
    Ok(child_ids(DATASET_TYPE, project, names))
  }
}

fn normalize(object: &serde_json::Map<String, Value>) -> Attributes {
  let mut attributes = Attributes::new();

  if let Some(params) = object.get("params").and_then(Value::as_object) {
    for (key, value) in params {
      if !value.is_null() {
        attributes.insert(key.clone(), value.clone());
      }
    }
  }

  // Fixed fields win over same-named connection parameters.
  let fixed = [
    ("type", object.get("type")),
    ("columns", object.get("schema").and_then(|s| s.get("columns"))),
    ("format_type", object.get("formatType")),
    ("format_params", object.get("formatParams")),
    ("managed", object.get("managed")),
  ];
  for (attribute, value) in fixed {
    if let Some(value) = value.filter(|v| !v.is_null()) {
      if attributes.insert(attribute.to_string(), value.clone()).is_some() {
        debug!(attribute, "dataset parameter shadowed by settings field");
      }
    }
  }

  attributes
}
