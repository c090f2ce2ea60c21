//! State diffing.
//!
//! [`compute_diff`] compares two snapshots resource by resource. Resources are
//! matched by id; a renamed item therefore shows up as one removal plus one
//! addition.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};

use serde::Serialize;
use serde_json::Value;

use crate::resource::{Attributes, Resource, ResourceError, ResourceId};
use crate::state::State;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
  Added,
  Removed,
  Modified,
  Unchanged,
}

impl ChangeKind {
  fn marker(self) -> char {
    match self {
      ChangeKind::Added => '+',
      ChangeKind::Removed => '-',
      ChangeKind::Modified => '~',
      ChangeKind::Unchanged => '=',
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeChange {
  pub old: Value,
  pub new: Value,
}

/// Attribute-level delta of a modified resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttributeDiff {
  pub added: BTreeMap<String, Value>,
  pub removed: BTreeMap<String, Value>,
  pub modified: BTreeMap<String, AttributeChange>,
}

impl AttributeDiff {
  pub fn between(old: &Attributes, new: &Attributes) -> Self {
    let mut diff = AttributeDiff::default();

    for (key, new_value) in new {
      match old.get(key) {
        None => {
          diff.added.insert(key.clone(), new_value.clone());
        }
        Some(old_value) if old_value != new_value => {
          diff.modified.insert(
            key.clone(),
            AttributeChange {
              old: old_value.clone(),
              new: new_value.clone(),
            },
          );
        }
        Some(_) => {}
      }
    }
    for (key, old_value) in old {
      if !new.contains_key(key) {
        diff.removed.insert(key.clone(), old_value.clone());
      }
    }

    diff
  }

  pub fn is_empty(&self) -> bool {
    self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
  }
}

/// The change of one resource between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDiff {
  pub kind: ChangeKind,
  pub resource_type: String,
  pub resource_id: ResourceId,
  pub old: Option<Resource>,
  pub new: Option<Resource>,
  /// Present for [`ChangeKind::Modified`] only.
  pub attributes: Option<AttributeDiff>,
}

impl ResourceDiff {
  fn added(resource: &Resource) -> Self {
    Self {
      kind: ChangeKind::Added,
      resource_type: resource.resource_type().to_string(),
      resource_id: resource.id().clone(),
      old: None,
      new: Some(resource.clone()),
      attributes: None,
    }
  }

  fn removed(resource: &Resource) -> Self {
    Self {
      kind: ChangeKind::Removed,
      resource_type: resource.resource_type().to_string(),
      resource_id: resource.id().clone(),
      old: Some(resource.clone()),
      new: None,
      attributes: None,
    }
  }

  fn compared(old: &Resource, new: &Resource) -> Result<Self, ResourceError> {
    let changed = old.has_changed(new)?;
    let (kind, attributes) = if changed {
      (
        ChangeKind::Modified,
        Some(AttributeDiff::between(old.attributes(), new.attributes())),
      )
    } else {
      (ChangeKind::Unchanged, None)
    };
    Ok(Self {
      kind,
      resource_type: new.resource_type().to_string(),
      resource_id: new.id().clone(),
      old: Some(old.clone()),
      new: Some(new.clone()),
      attributes,
    })
  }
}

/// Per-kind entry counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
  pub added: usize,
  pub removed: usize,
  pub modified: usize,
  pub unchanged: usize,
}

impl DiffSummary {
  pub fn total_changes(&self) -> usize {
    self.added + self.removed + self.modified
  }
}

impl fmt::Display for DiffSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} added, {} removed, {} modified, {} unchanged",
      self.added, self.removed, self.modified, self.unchanged
    )
  }
}

/// Every resource of either snapshot, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateDiff {
  entries: Vec<ResourceDiff>,
}

impl StateDiff {
  pub fn entries(&self) -> &[ResourceDiff] {
    &self.entries
  }

  pub fn get(&self, id: &str) -> Option<&ResourceDiff> {
    self
      .entries
      .binary_search_by(|e| e.resource_id.as_str().cmp(id))
      .ok()
      .map(|i| &self.entries[i])
  }

  pub fn summary(&self) -> DiffSummary {
    let mut summary = DiffSummary::default();
    for entry in &self.entries {
      match entry.kind {
        ChangeKind::Added => summary.added += 1,
        ChangeKind::Removed => summary.removed += 1,
        ChangeKind::Modified => summary.modified += 1,
        ChangeKind::Unchanged => summary.unchanged += 1,
      }
    }
    summary
  }

  pub fn has_changes(&self) -> bool {
    self.entries.iter().any(|e| e.kind != ChangeKind::Unchanged)
  }

  pub fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &ResourceDiff> {
    self.entries.iter().filter(move |e| e.kind == kind)
  }

  pub fn added_ids(&self) -> BTreeSet<&ResourceId> {
    self.of_kind(ChangeKind::Added).map(|e| &e.resource_id).collect()
  }

  pub fn removed_ids(&self) -> BTreeSet<&ResourceId> {
    self.of_kind(ChangeKind::Removed).map(|e| &e.resource_id).collect()
  }

  pub fn modified(&self) -> impl Iterator<Item = &ResourceDiff> {
    self.of_kind(ChangeKind::Modified)
  }

  /// Human-readable report, one line per resource followed by a summary.
  pub fn format_output(&self, include_unchanged: bool) -> String {
    let mut out = String::new();

    for entry in &self.entries {
      if entry.kind == ChangeKind::Unchanged && !include_unchanged {
        continue;
      }
      let _ = writeln!(out, "{} {}", entry.kind.marker(), entry.resource_id);

      if let Some(attributes) = &entry.attributes {
        for (key, value) in &attributes.added {
          let _ = writeln!(out, "    + {}: {}", key, value);
        }
        for (key, value) in &attributes.removed {
          let _ = writeln!(out, "    - {}: {}", key, value);
        }
        for (key, change) in &attributes.modified {
          let _ = writeln!(out, "    ~ {}: {} -> {}", key, change.old, change.new);
        }
      }
    }

    if !self.has_changes() {
      out.push_str("No changes.\n");
    }
    let _ = writeln!(out, "Summary: {}", self.summary());
    out
  }
}

impl fmt::Display for StateDiff {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.format_output(false))
  }
}

/// Compare two snapshots.
///
/// Fails only if a resource's stored id disagrees with its key, which a
/// validated [`State`] never allows.
pub fn compute_diff(old: &State, new: &State) -> Result<StateDiff, ResourceError> {
  let mut entries = Vec::with_capacity(old.len().max(new.len()));

  for (id, old_resource) in old.resources() {
    match new.get(id.as_str()) {
      Some(new_resource) => entries.push(ResourceDiff::compared(old_resource, new_resource)?),
      None => entries.push(ResourceDiff::removed(old_resource)),
    }
  }
  for (id, new_resource) in new.resources() {
    if !old.contains(id.as_str()) {
      entries.push(ResourceDiff::added(new_resource));
    }
  }

  entries.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
  Ok(StateDiff { entries })
}
