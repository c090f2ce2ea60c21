//! Hashing utilities for change detection.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 digest
//! - `canonical_json()`: key-sorted JSON rendering used as hash input
//! - `hash_attributes()`: the checksum of a resource's attribute mapping
//! - `hash_bytes()`: arbitrary byte hashing

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A full 64-character SHA-256 hash.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Returns true if the value is a well-formed digest.
  pub fn is_well_formed(&self) -> bool {
    self.0.len() == 64 && self.0.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Render a JSON value with object keys sorted at every depth.
///
/// The output does not depend on the insertion order of any map, so it is
/// safe to hash regardless of how `serde_json` was compiled.
pub fn canonical_json(value: &Value) -> String {
  let mut out = String::new();
  write_canonical(value, &mut out);
  out
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      out.push('{');
      for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(&map[key.as_str()], out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}

/// Checksum of an attribute mapping.
pub fn hash_attributes(attributes: &BTreeMap<String, Value>) -> ContentHash {
  let object: serde_json::Map<String, Value> = attributes.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
  hash_bytes(canonical_json(&Value::Object(object)).as_bytes())
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}
