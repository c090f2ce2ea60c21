//! Persisted state document format.
//!
//! Documents are validated in three steps before they become a [`State`]:
//!
//! 1. the `version` field must be a supported schema version
//! 2. the document must satisfy the JSON Schema for that version
//! 3. typed deserialization must succeed, including model invariants
//!
//! # Document Layout
//!
//! ```json
//! {
//!   "version": 1,
//!   "serial": 4,
//!   "lineage": "9f2c1e0",
//!   "environment": "prod",
//!   "updatedAt": "2026-01-12T09:30:00Z",
//!   "resources": {
//!     "dataset.SALES.RAW_ORDERS": {
//!       "resourceType": "dataset",
//!       "resourceId": "dataset.SALES.RAW_ORDERS",
//!       "attributes": { "type": "sql", "table": "orders" },
//!       "metadata": {
//!         "deployedAt": "2026-01-12T09:30:00Z",
//!         "deployedBy": "ci",
//!         "internalId": "SALES.RAW_ORDERS",
//!         "checksum": "<64 lowercase hex characters>"
//!       }
//!     }
//!   }
//! }
//! ```

use std::sync::LazyLock;

use jsonschema::Validator;
use serde_json::Value;
use thiserror::Error;

use super::State;
use crate::consts::STATE_VERSION;

/// JSON Schema (draft-07) for version 1 state documents.
pub const STATE_SCHEMA_V1: &str = include_str!("../../schema/state.v1.schema.json");

static STATE_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
  let schema: Value = serde_json::from_str(STATE_SCHEMA_V1).expect("embedded state schema is valid JSON");
  jsonschema::validator_for(&schema).expect("embedded state schema is a valid JSON Schema")
});

/// Reasons a persisted document cannot be materialized.
#[derive(Debug, Error)]
pub enum DocumentError {
  #[error("not valid JSON: {0}")]
  Syntax(#[source] serde_json::Error),

  #[error("missing or non-integer version field")]
  MissingVersion,

  #[error("unsupported state version {found} (supported: {supported})")]
  UnsupportedVersion { found: u64, supported: u32 },

  #[error("schema violations: {}", .0.join("; "))]
  Schema(Vec<String>),

  #[error("invalid state: {0}")]
  Invalid(#[source] serde_json::Error),
}

/// Check a raw document against the version gate and the schema.
pub fn validate_document(document: &Value) -> Result<(), DocumentError> {
  let found = document
    .get("version")
    .and_then(Value::as_u64)
    .ok_or(DocumentError::MissingVersion)?;
  if found != u64::from(STATE_VERSION) {
    return Err(DocumentError::UnsupportedVersion {
      found,
      supported: STATE_VERSION,
    });
  }

  let violations: Vec<String> = STATE_VALIDATOR.iter_errors(document).map(|e| e.to_string()).collect();
  if !violations.is_empty() {
    return Err(DocumentError::Schema(violations));
  }
  Ok(())
}

/// Parse, validate and materialize a state document.
pub fn parse_document(raw: &str) -> Result<State, DocumentError> {
  let document: Value = serde_json::from_str(raw).map_err(DocumentError::Syntax)?;
  validate_document(&document)?;
  serde_json::from_value(document).map_err(DocumentError::Invalid)
}
