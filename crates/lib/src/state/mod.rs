//! Versioned collections of tracked resources.
//!
//! A [`State`] is the full set of resources for one environment at one point
//! in time. It is persisted as a JSON document; see [`schema`] for the
//! validated wire format.

pub mod schema;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consts::STATE_VERSION;
use crate::resource::{Resource, ResourceId};

pub use schema::{DocumentError, STATE_SCHEMA_V1, parse_document};

/// The tracked resources of one environment.
///
/// # Invariants
/// - `serial` never decreases; every `add` and every effective `remove`
///   increments it by exactly one.
/// - Every key of `resources` equals the id of its value.
///
/// Equality compares the document only; where the state was read from is
/// not part of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawState")]
pub struct State {
  version: u32,
  serial: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  lineage: Option<String>,
  environment: String,
  updated_at: DateTime<Utc>,
  resources: BTreeMap<ResourceId, Resource>,
  #[serde(skip)]
  base_serial: Option<u64>,
}

impl PartialEq for State {
  fn eq(&self, other: &Self) -> bool {
    self.version == other.version
      && self.serial == other.serial
      && self.lineage == other.lineage
      && self.environment == other.environment
      && self.updated_at == other.updated_at
      && self.resources == other.resources
  }
}

impl State {
  /// Create an empty state for an environment.
  pub fn new(environment: impl Into<String>) -> Self {
    Self {
      version: STATE_VERSION,
      serial: 0,
      lineage: None,
      environment: environment.into(),
      updated_at: Utc::now(),
      resources: BTreeMap::new(),
      base_serial: None,
    }
  }

  pub fn with_lineage(mut self, lineage: impl Into<String>) -> Self {
    self.lineage = Some(lineage.into());
    self
  }

  pub fn version(&self) -> u32 {
    self.version
  }

  pub fn serial(&self) -> u64 {
    self.serial
  }

  pub fn lineage(&self) -> Option<&str> {
    self.lineage.as_deref()
  }

  pub fn set_lineage(&mut self, lineage: Option<String>) {
    self.lineage = lineage;
  }

  pub fn environment(&self) -> &str {
    &self.environment
  }

  pub fn set_environment(&mut self, environment: impl Into<String>) {
    self.environment = environment.into();
  }

  pub fn updated_at(&self) -> DateTime<Utc> {
    self.updated_at
  }

  /// Serial of the persisted revision this state was read from.
  ///
  /// `Some(0)` when nothing had been persisted yet, `None` for a state built
  /// in memory.
  pub fn base_serial(&self) -> Option<u64> {
    self.base_serial
  }

  /// Record that this state is now the persisted revision.
  pub(crate) fn mark_persisted(&mut self) {
    self.base_serial = Some(self.serial);
  }

  /// Returns true if this state may replace a persisted revision with `persisted` serial.
  ///
  /// A state read from that very revision may replace it as long as its
  /// serial did not drop. A state read from any other revision never may. A
  /// state built in memory must carry a strictly higher serial.
  pub fn supersedes(&self, persisted: u64) -> bool {
    match self.base_serial {
      Some(base) => base == persisted && self.serial >= persisted,
      None => self.serial > persisted,
    }
  }

  /// Insert or replace a resource, returning the previous revision.
  pub fn add(&mut self, resource: Resource) -> Option<Resource> {
    self.serial += 1;
    self.updated_at = Utc::now();
    self.resources.insert(resource.id().clone(), resource)
  }

  /// Remove a resource by id. Removing an unknown id leaves the state untouched.
  pub fn remove(&mut self, id: &str) -> Option<Resource> {
    let removed = self.resources.remove(id)?;
    self.serial += 1;
    self.updated_at = Utc::now();
    Some(removed)
  }

  pub fn get(&self, id: &str) -> Option<&Resource> {
    self.resources.get(id)
  }

  pub fn contains(&self, id: &str) -> bool {
    self.resources.contains_key(id)
  }

  pub fn len(&self) -> usize {
    self.resources.len()
  }

  pub fn is_empty(&self) -> bool {
    self.resources.is_empty()
  }

  /// Resources ordered by id.
  pub fn iter(&self) -> impl Iterator<Item = &Resource> {
    self.resources.values()
  }

  pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
    self.resources.keys()
  }

  pub fn resources(&self) -> &BTreeMap<ResourceId, Resource> {
    &self.resources
  }

  pub fn resources_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
    self.iter().filter(move |r| r.resource_type() == resource_type)
  }

  /// Resources whose id lives under `container`, including the container itself.
  pub fn resources_in_container<'a>(&'a self, container: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
    self.iter().filter(move |r| r.id().container() == container)
  }

  /// Continue the history of `previous` with this state.
  ///
  /// Afterwards this state's serial is greater than the previous one and the
  /// lineage is inherited when this state has none.
  pub fn supersede(&mut self, previous: &State) {
    self.serial = self.serial.max(previous.serial.saturating_add(1));
    if self.lineage.is_none() {
      self.lineage = previous.lineage.clone();
    }
  }

  /// Serialize to the persisted document format.
  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(self)
  }

  /// Parse and validate a persisted document.
  pub fn from_json(raw: &str) -> Result<Self, DocumentError> {
    parse_document(raw)
  }
}

/// Wire shape of a state, validated into [`State`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawState {
  version: u32,
  serial: u64,
  #[serde(default)]
  lineage: Option<String>,
  environment: String,
  updated_at: DateTime<Utc>,
  resources: BTreeMap<ResourceId, Resource>,
}

impl TryFrom<RawState> for State {
  type Error = String;

  fn try_from(raw: RawState) -> Result<Self, Self::Error> {
    if let Some((key, resource)) = raw.resources.iter().find(|(key, resource)| *key != resource.id()) {
      return Err(format!(
        "resource stored under '{}' carries id '{}'",
        key,
        resource.id()
      ));
    }
    Ok(Self {
      version: raw.version,
      serial: raw.serial,
      lineage: raw.lineage,
      environment: raw.environment,
      updated_at: raw.updated_at,
      resources: raw.resources,
      base_serial: Some(raw.serial),
    })
  }
}
