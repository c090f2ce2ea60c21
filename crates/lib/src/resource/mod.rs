//! Tracked resources.
//!
//! A [`Resource`] is one managed item on the remote platform (a project, a
//! dataset, a recipe). Its attributes are an opaque, ordered mapping; its
//! checksum is derived from them and is the only thing change detection
//! looks at.

mod id;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::util::hash::{ContentHash, hash_attributes};

pub use id::{RESOURCE_ID_PATTERN, ResourceId};

/// Resource-specific key/value data.
pub type Attributes = BTreeMap<String, Value>;

/// Errors raised by misuse of the data model.
///
/// These indicate programming errors and are never recovered from silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
  #[error("invalid resource id '{id}': {reason}")]
  InvalidId { id: String, reason: String },

  #[error("resource id '{id}' does not belong to resource type '{resource_type}'")]
  TypeMismatch { id: String, resource_type: String },

  #[error("cannot compare resource '{left}' with a different resource '{right}'")]
  IdMismatch { left: String, right: String },

  #[error("resource '{id}' stores checksum {stored} but its attributes hash to {computed}")]
  ChecksumMismatch {
    id: String,
    stored: ContentHash,
    computed: ContentHash,
  },
}

/// Deployment provenance of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
  pub deployed_at: DateTime<Utc>,
  pub deployed_by: String,
  /// Identifier the remote platform uses for this item, kept for correlation only.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub internal_id: Option<String>,
  pub checksum: ContentHash,
}

/// One tracked item.
///
/// Construct with [`Resource::new`]; the shape is fixed afterwards and
/// changes go through [`Resource::with_attributes`], which produces a new
/// value with a fresh checksum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawResource")]
pub struct Resource {
  resource_type: String,
  resource_id: ResourceId,
  attributes: Attributes,
  metadata: ResourceMetadata,
}

impl Resource {
  /// Create a resource, validating that `resource_id` belongs to `resource_type`.
  pub fn new(resource_type: &str, resource_id: &str, attributes: Attributes) -> Result<Self, ResourceError> {
    let id = ResourceId::parse(resource_id)?;
    Self::from_id(resource_type, id, attributes)
  }

  /// Create a resource from an already parsed id.
  pub fn from_id(resource_type: &str, resource_id: ResourceId, attributes: Attributes) -> Result<Self, ResourceError> {
    if resource_id.resource_type() != resource_type {
      return Err(ResourceError::TypeMismatch {
        id: resource_id.to_string(),
        resource_type: resource_type.to_string(),
      });
    }
    let checksum = hash_attributes(&attributes);
    Ok(Self {
      resource_type: resource_type.to_string(),
      resource_id,
      attributes,
      metadata: ResourceMetadata {
        deployed_at: Utc::now(),
        deployed_by: String::new(),
        internal_id: None,
        checksum,
      },
    })
  }

  pub fn with_deployed_by(mut self, actor: impl Into<String>) -> Self {
    self.metadata.deployed_by = actor.into();
    self
  }

  pub fn with_deployed_at(mut self, at: DateTime<Utc>) -> Self {
    self.metadata.deployed_at = at;
    self
  }

  pub fn with_internal_id(mut self, internal_id: Option<String>) -> Self {
    self.metadata.internal_id = internal_id;
    self
  }

  /// Rebuild this resource with new attributes, keeping its identity and provenance.
  pub fn with_attributes(mut self, attributes: Attributes) -> Self {
    self.metadata.checksum = hash_attributes(&attributes);
    self.attributes = attributes;
    self
  }

  pub fn resource_type(&self) -> &str {
    &self.resource_type
  }

  pub fn id(&self) -> &ResourceId {
    &self.resource_id
  }

  pub fn attributes(&self) -> &Attributes {
    &self.attributes
  }

  pub fn attribute(&self, key: &str) -> Option<&Value> {
    self.attributes.get(key)
  }

  pub fn metadata(&self) -> &ResourceMetadata {
    &self.metadata
  }

  pub fn checksum(&self) -> &ContentHash {
    &self.metadata.checksum
  }

  /// Returns true if `other` is a different revision of this resource.
  ///
  /// Only checksums are compared. Comparing two different resources is a
  /// usage error.
  pub fn has_changed(&self, other: &Resource) -> Result<bool, ResourceError> {
    if self.resource_id != other.resource_id {
      return Err(ResourceError::IdMismatch {
        left: self.resource_id.to_string(),
        right: other.resource_id.to_string(),
      });
    }
    Ok(self.metadata.checksum != other.metadata.checksum)
  }
}

/// Wire shape of a resource, validated into [`Resource`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResource {
  resource_type: String,
  resource_id: ResourceId,
  attributes: Attributes,
  metadata: ResourceMetadata,
}

impl TryFrom<RawResource> for Resource {
  type Error = ResourceError;

  fn try_from(raw: RawResource) -> Result<Self, Self::Error> {
    if raw.resource_id.resource_type() != raw.resource_type {
      return Err(ResourceError::TypeMismatch {
        id: raw.resource_id.to_string(),
        resource_type: raw.resource_type,
      });
    }
    let computed = hash_attributes(&raw.attributes);
    if computed != raw.metadata.checksum {
      return Err(ResourceError::ChecksumMismatch {
        id: raw.resource_id.to_string(),
        stored: raw.metadata.checksum,
        computed,
      });
    }
    Ok(Self {
      resource_type: raw.resource_type,
      resource_id: raw.resource_id,
      attributes: raw.attributes,
      metadata: raw.metadata,
    })
  }
}
