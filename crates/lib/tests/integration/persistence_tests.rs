use std::time::Duration;

use serde_json::json;
use stateplane_lib::backend::LockInfo;
use stateplane_lib::state::{DocumentError, STATE_SCHEMA_V1, parse_document};
use stateplane_lib::{Attributes, LocalFileBackend, ManagerError, Resource, State, StateBackend, StateError};

use super::common::{TestEnv, fixture_content, fixture_path};

#[tokio::test]
async fn synced_state_round_trips_through_the_file() {
  let env = TestEnv::customer_analytics();
  let manager = env.manager(env.config("prod"));

  let saved = manager.refresh().await.unwrap();
  let backend = LocalFileBackend::new(env.state_dir(), "prod").unwrap();
  let loaded = backend.load().unwrap();

  assert_eq!(loaded.version(), saved.version());
  assert_eq!(loaded.serial(), saved.serial());
  assert_eq!(loaded.environment(), "prod");
  assert_eq!(loaded.ids().collect::<Vec<_>>(), saved.ids().collect::<Vec<_>>());
  for resource in saved.iter() {
    let other = loaded.get(resource.id().as_str()).unwrap();
    assert_eq!(other.checksum(), resource.checksum());
    assert_eq!(other.metadata().deployed_by, "ci-runner");
  }
}

#[test]
fn fixture_document_loads_with_matching_checksums() {
  let state = parse_document(&fixture_content("state_v1.json")).unwrap();

  assert_eq!(state.serial(), 7);
  assert_eq!(state.lineage(), Some("9a4f6c0e-analytics"));
  let raw = state.get("dataset.CUSTOMER_ANALYTICS.RAW_CUSTOMERS").unwrap();
  assert_eq!(
    raw.checksum().as_str(),
    "ad894306a2ad269aefd57575794a8b6f22b7cee037c648f1a81957a32d81aaca"
  );
  assert!(state.get("project.CUSTOMER_ANALYTICS").unwrap().metadata().internal_id.is_none());

  // A freshly built revision with the same attributes is unchanged.
  let fresh = Resource::new("dataset", raw.id().as_str(), raw.attributes().clone()).unwrap();
  assert!(!raw.has_changed(&fresh).unwrap());
}

#[test]
fn tampered_attributes_are_corrupted() {
  let env = TestEnv::customer_analytics();
  let backend = LocalFileBackend::new(env.state_dir(), "prod").unwrap();
  let tampered = fixture_content("state_v1.json").replace("\"customers\"", "\"customers_v2\"");
  std::fs::write(backend.path(), tampered).unwrap();

  match backend.load() {
    Err(StateError::Corrupted { reason, .. }) => {
      assert!(reason.contains("dataset.CUSTOMER_ANALYTICS.RAW_CUSTOMERS"), "reason: {}", reason);
      assert!(reason.contains("checksum"), "reason: {}", reason);
    }
    other => panic!("expected Corrupted, got: {:?}", other.map(|s| s.serial())),
  }
}

#[test]
fn unsupported_version_is_corrupted() {
  let env = TestEnv::customer_analytics();
  let backend = LocalFileBackend::new(env.state_dir(), "prod").unwrap();
  std::fs::copy(fixture_path("state_v2.json"), backend.path()).unwrap();

  match backend.load() {
    Err(StateError::Corrupted { reason, .. }) => assert!(reason.contains("version"), "reason: {}", reason),
    other => panic!("expected Corrupted, got: {:?}", other.map(|s| s.serial())),
  }
  assert!(matches!(
    parse_document(&fixture_content("state_v2.json")),
    Err(DocumentError::UnsupportedVersion { found: 2, .. })
  ));
}

#[test]
fn corrupted_state_blocks_transactions_until_restored() {
  let env = TestEnv::customer_analytics();
  let manager = env.manager(env.config("prod"));
  let backend = LocalFileBackend::new(env.state_dir(), "prod").unwrap();

  manager
    .update_state(|state| {
      let attributes: Attributes = serde_json::from_value(json!({"table": "orders"})).unwrap();
      state.add(Resource::new("dataset", "dataset.SALES.ORDERS", attributes).unwrap());
    })
    .unwrap();
  manager.update_state(|state| state.remove("dataset.SALES.ORDERS")).unwrap();

  std::fs::write(backend.path(), "{\"version\": 1, \"serial\": ").unwrap();
  assert!(matches!(
    manager.load_state(),
    Err(ManagerError::State(StateError::Corrupted { .. }))
  ));
  assert!(manager.update_state(|_| ()).is_err());

  let backups = backend.list_backups().unwrap();
  let serial_one = backups
    .iter()
    .find(|p| p.to_string_lossy().contains("serial-1"))
    .unwrap();
  let restored = backend.restore_backup(serial_one).unwrap();
  assert_eq!(restored.serial(), 1);
  assert_eq!(manager.load_state().unwrap().len(), 1);
  assert!(
    backend
      .list_backups()
      .unwrap()
      .iter()
      .any(|p| p.to_string_lossy().contains("pre-restore-"))
  );
}

#[cfg(unix)]
#[test]
fn held_lock_reports_holder_and_since() {
  let env = TestEnv::customer_analytics();
  let manager = env.manager(env.config("prod").with_lock_timeout(Duration::ZERO));
  let backend = LocalFileBackend::new(env.state_dir(), "prod").unwrap();

  let guard = backend.lock("nightly-refresh", Duration::ZERO).unwrap();
  let info: &LockInfo = guard.info();

  let err = manager.save_state(&mut State::new("prod")).unwrap_err();
  let message = err.to_string();
  assert!(message.contains("nightly-refresh"), "message: {}", message);
  assert!(message.contains(&info.acquired_at.to_rfc3339()), "message: {}", message);
  assert!(matches!(err, ManagerError::State(StateError::LockHeld { .. })));

  drop(guard);
  manager.save_state(&mut State::new("prod")).unwrap();
}

#[test]
fn environments_are_isolated() {
  let env = TestEnv::customer_analytics();
  let prod = env.manager(env.config("prod"));
  let staging = env.manager(env.config("staging"));

  prod
    .update_state(|state| {
      state.add(Resource::new("dataset", "dataset.SALES.ORDERS", Attributes::new()).unwrap());
    })
    .unwrap();

  assert_eq!(prod.load_state().unwrap().len(), 1);
  let staging_state = staging.load_state().unwrap();
  assert!(staging_state.is_empty());
  assert_eq!(staging_state.environment(), "staging");

  // One lock per environment.
  let _prod_lock = prod.backend().lock("holder", Duration::ZERO).unwrap();
  staging.update_state(|_| ()).unwrap();
}

#[test]
fn shipped_schema_is_valid_json() {
  let schema: serde_json::Value = serde_json::from_str(STATE_SCHEMA_V1).unwrap();
  assert_eq!(schema["properties"]["version"]["const"], json!(1));
}
