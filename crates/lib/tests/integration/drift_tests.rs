use serde_json::json;
use stateplane_lib::diff::AttributeChange;
use stateplane_lib::{ChangeKind, compute_diff};

use super::common::TestEnv;

const RAW_CUSTOMERS: &str = "dataset.CUSTOMER_ANALYTICS.RAW_CUSTOMERS";

#[tokio::test]
async fn renamed_table_is_one_modified_attribute() {
  let env = TestEnv::customer_analytics();
  let manager = env.manager(env.config("prod"));

  let baseline = manager.refresh().await.unwrap();
  assert_eq!(baseline.get(RAW_CUSTOMERS).unwrap().attribute("table"), Some(&json!("customers")));

  env
    .platform
    .edit_dataset("CUSTOMER_ANALYTICS", "RAW_CUSTOMERS", |settings| {
      settings["params"]["table"] = json!("customers_v2");
    });

  let diff = manager.detect_drift().await.unwrap();
  let summary = diff.summary();
  assert_eq!(summary.modified, 1);
  assert_eq!(summary.added, 0);
  assert_eq!(summary.removed, 0);

  let entry = diff.get(RAW_CUSTOMERS).unwrap();
  assert_eq!(entry.kind, ChangeKind::Modified);
  let attributes = entry.attributes.as_ref().unwrap();
  assert!(attributes.added.is_empty());
  assert!(attributes.removed.is_empty());
  assert_eq!(attributes.modified.len(), 1);
  assert_eq!(
    attributes.modified["table"],
    AttributeChange {
      old: json!("customers"),
      new: json!("customers_v2"),
    }
  );

  let report = diff.to_string();
  assert!(report.contains("~ dataset.CUSTOMER_ANALYTICS.RAW_CUSTOMERS\n"));
  assert!(report.contains("~ table: \"customers\" -> \"customers_v2\""));
}

#[tokio::test]
async fn fresh_syncs_have_no_false_positives() {
  let env = TestEnv::customer_analytics();
  let manager = env.manager(env.config("prod"));

  let first = manager.sync_all().await.unwrap();
  let second = manager.sync_all().await.unwrap();

  let diff = compute_diff(&first, &second).unwrap();
  assert!(!diff.has_changes());
  assert_eq!(diff.summary().unchanged, first.len());
}

#[tokio::test]
async fn deleted_and_created_resources() {
  let env = TestEnv::customer_analytics();
  let manager = env.manager(env.config("prod"));
  manager.refresh().await.unwrap();

  env.platform.remove_recipe("MARKETING", "JOIN_CAMPAIGNS");
  env.platform.put_dataset(
    "MARKETING",
    "CAMPAIGN_REPORT",
    json!({"type": "Snowflake", "params": {"connection": "snowflake", "table": "campaign_report"}}),
  );

  let diff = manager.detect_drift().await.unwrap();
  let added: Vec<&str> = diff.added_ids().into_iter().map(|id| id.as_str()).collect();
  let removed: Vec<&str> = diff.removed_ids().into_iter().map(|id| id.as_str()).collect();
  assert_eq!(added, vec!["dataset.MARKETING.CAMPAIGN_REPORT"]);
  assert_eq!(removed, vec!["recipe.MARKETING.JOIN_CAMPAIGNS"]);
  assert_eq!(diff.modified().count(), 0);
}

#[tokio::test]
async fn refresh_after_drift_clears_it() {
  let env = TestEnv::customer_analytics();
  let manager = env.manager(env.config("prod"));

  let first = manager.refresh().await.unwrap();
  env
    .platform
    .edit_dataset("CUSTOMER_ANALYTICS", "CUSTOMER_FEATURES", |settings| {
      settings["formatType"] = json!("csv");
    });
  assert!(manager.detect_drift().await.unwrap().has_changes());

  let second = manager.refresh().await.unwrap();
  assert!(second.serial() > first.serial());
  assert!(!manager.detect_drift().await.unwrap().has_changes());
}

#[tokio::test]
async fn bounded_parallelism_limits_calls_in_flight() {
  let env = TestEnv::new(
    super::common::FakePlatform::from_fixture("customer_analytics.json")
      .with_latency(std::time::Duration::from_millis(20)),
  );
  let manager = env.manager(env.config("prod").with_parallelism(2));

  let state = manager.sync_all().await.unwrap();

  assert_eq!(state.len(), 7);
  assert!(env.platform.peak_in_flight() <= 2);
  assert!(env.platform.calls() >= state.len());
}
