//! Synthetic resource identifiers.
//!
//! A resource id has the form `{type}.{containerKey}[.{name}]`, for example
//! `project.SALES` or `dataset.SALES.RAW_ORDERS`. The id is independent of any
//! identifier the remote platform assigns, so it stays stable across
//! environments.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ResourceError;

/// Grammar every resource id must match.
///
/// The same pattern is enforced by the persisted state schema.
pub const RESOURCE_ID_PATTERN: &str = r"^[a-z_]+\.[A-Z][A-Z0-9_]*(\.[A-Z][A-Za-z0-9_]*)?$";

static RESOURCE_ID_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(RESOURCE_ID_PATTERN).expect("resource id pattern is a valid regex"));

/// A validated resource identifier.
///
/// # Invariants
/// - Matches [`RESOURCE_ID_PATTERN`]: two or three dot-separated segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
  /// Parse and validate an id.
  pub fn parse(raw: &str) -> Result<Self, ResourceError> {
    if raw.split('.').count() < 2 {
      return Err(ResourceError::InvalidId {
        id: raw.to_string(),
        reason: "expected at least two dot-separated segments".to_string(),
      });
    }
    if !RESOURCE_ID_RE.is_match(raw) {
      return Err(ResourceError::InvalidId {
        id: raw.to_string(),
        reason: format!("does not match {}", RESOURCE_ID_PATTERN),
      });
    }
    Ok(Self(raw.to_string()))
  }

  /// Build an id from its segments.
  pub fn new(resource_type: &str, container: &str, name: Option<&str>) -> Result<Self, ResourceError> {
    match name {
      Some(name) => Self::parse(&format!("{}.{}.{}", resource_type, container, name)),
      None => Self::parse(&format!("{}.{}", resource_type, container)),
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// The type segment, e.g. `dataset`.
  pub fn resource_type(&self) -> &str {
    self.segment(0).unwrap_or_default()
  }

  /// The container key segment, e.g. `SALES`.
  pub fn container(&self) -> &str {
    self.segment(1).unwrap_or_default()
  }

  /// The name segment, absent for container resources.
  pub fn name(&self) -> Option<&str> {
    self.segment(2)
  }

  fn segment(&self, index: usize) -> Option<&str> {
    self.0.splitn(3, '.').nth(index)
  }
}

impl fmt::Display for ResourceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl FromStr for ResourceId {
  type Err = ResourceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl TryFrom<String> for ResourceId {
  type Error = ResourceError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::parse(&value)
  }
}

impl From<ResourceId> for String {
  fn from(id: ResourceId) -> Self {
    id.0
  }
}

impl AsRef<str> for ResourceId {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

impl std::borrow::Borrow<str> for ResourceId {
  fn borrow(&self) -> &str {
    &self.0
  }
}
