//! Recipe synchronizer.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use super::{
  PlatformClient, ResourceSynchronizer, SyncError, check_project_key, child_ids, expect_object, require_container,
  require_name,
};
use crate::resource::{Attributes, Resource, ResourceId};

pub const RECIPE_TYPE: &str = "recipe";

/// Recipe kinds whose payload is source code.
pub const CODE_RECIPE_TYPES: &[&str] = &[
  "python",
  "r",
  "sql_query",
  "sql_script",
  "pyspark",
  "spark_scala",
  "sparkr",
  "shell",
  "hive",
  "impala",
  "spark_sql_query",
  "julia",
];

/// Reads recipes from a project.
///
/// Input and output references are reduced to sorted dataset names per
/// role. The payload is kept as `code` for code-bearing kinds only.
pub struct RecipeSynchronizer {
  client: Arc<dyn PlatformClient>,
  actor: String,
}

impl RecipeSynchronizer {
  pub fn new(client: Arc<dyn PlatformClient>, actor: &str) -> Self {
    Self {
      client,
      actor: actor.to_string(),
    }
  }
}

impl ResourceSynchronizer for RecipeSynchronizer {
  fn resource_type(&self) -> &str {
    RECIPE_TYPE
  }

  fn fetch(&self, id: &ResourceId) -> Result<Resource, SyncError> {
    let name = require_name(RECIPE_TYPE, id)?;
    let project = id.container();

    let raw = self
      .client
      .get_recipe(project, name)
      .map_err(|e| SyncError::remote(id, e))?
      .ok_or_else(|| SyncError::ResourceNotFound(id.to_string()))?;

    let object = expect_object(id, &raw)?;
    check_project_key(id, object)?;

    let attributes = normalize(object);
    debug!(id = %id, kind = ?attributes.get("type"), "fetched recipe");

    Ok(
      Resource::from_id(RECIPE_TYPE, id.clone(), attributes)?
        .with_deployed_by(&self.actor)
        .with_internal_id(Some(format!("{}.{}", project, name))),
    )
  }

  fn list_ids(&self, container: Option<&str>) -> Result<Vec<ResourceId>, SyncError> {
    let project = require_container(RECIPE_TYPE, container)?;
    let names = self
      .client
      .list_recipes(project)
      .map_err(|e| SyncError::remote(format!("recipes of {}", project), e))?;
    Ok(child_ids(RECIPE_TYPE, project, names))
  }
}

fn normalize(object: &Map<String, Value>) -> Attributes {
  let mut attributes = Attributes::new();

  let kind = object.get("type").and_then(Value::as_str);
  if let Some(kind) = kind {
    attributes.insert("type".to_string(), Value::from(kind));
  }
  if let Some(inputs) = object.get("inputs") {
    attributes.insert("inputs".to_string(), role_refs(inputs));
  }
  if let Some(outputs) = object.get("outputs") {
    attributes.insert("outputs".to_string(), role_refs(outputs));
  }
  if let Some(params) = object.get("params").filter(|v| !v.is_null()) {
    attributes.insert("params".to_string(), params.clone());
  }
  if kind.is_some_and(|k| CODE_RECIPE_TYPES.contains(&k)) {
    if let Some(code) = object.get("payload").filter(|v| !v.is_null()) {
      attributes.insert("code".to_string(), code.clone());
    }
  }

  attributes
}

/// `{"main": {"items": [{"ref": "B"}, {"ref": "A"}]}}` becomes `{"main": ["A", "B"]}`.
fn role_refs(roles: &Value) -> Value {
  let mut out = Map::new();
  if let Some(roles) = roles.as_object() {
    for (role, binding) in roles {
      let mut refs: Vec<&str> = binding
        .get("items")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|item| item.get("ref")?.as_str()).collect())
        .unwrap_or_default();
      refs.sort_unstable();
      out.insert(role.clone(), Value::from(refs));
    }
  }
  Value::Object(out)
}
