//! Test utilities for stateplane-lib.
//!
//! [`FakePlatform`] is an in-memory [`PlatformClient`] whose contents tests
//! mutate between synchronizations to simulate remote changes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use serde_json::Value;

use crate::sync::{ClientError, PlatformClient};

type Key = (String, String);

#[derive(Default)]
struct Items {
  projects: BTreeMap<String, Value>,
  datasets: BTreeMap<Key, Option<Value>>,
  recipes: BTreeMap<Key, Option<Value>>,
}

#[derive(Default)]
pub struct FakePlatform {
  items: Mutex<Items>,
  failure: Mutex<Option<ClientError>>,
}

impl FakePlatform {
  pub fn put_project(&self, key: &str, summary: Value) {
    self.items.lock().unwrap().projects.insert(key.to_string(), summary);
  }

  pub fn put_dataset(&self, project: &str, name: &str, settings: Value) {
    let mut items = self.items.lock().unwrap();
    items.projects.entry(project.to_string()).or_insert_with(|| Value::Object(Default::default()));
    items.datasets.insert(key(project, name), Some(settings));
  }

  /// List a dataset name that cannot be fetched, as if it was deleted after listing.
  pub fn list_dataset_name(&self, project: &str, name: &str) {
    self.items.lock().unwrap().datasets.insert(key(project, name), None);
  }

  pub fn remove_dataset(&self, project: &str, name: &str) {
    self.items.lock().unwrap().datasets.remove(&key(project, name));
  }

  pub fn put_recipe(&self, project: &str, name: &str, definition: Value) {
    let mut items = self.items.lock().unwrap();
    items.projects.entry(project.to_string()).or_insert_with(|| Value::Object(Default::default()));
    items.recipes.insert(key(project, name), Some(definition));
  }

  /// Make every subsequent call fail with `error`.
  pub fn fail_with(&self, error: ClientError) {
    *self.failure.lock().unwrap() = Some(error);
  }

  fn check(&self) -> Result<(), ClientError> {
    match self.failure.lock().unwrap().clone() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}

fn key(project: &str, name: &str) -> Key {
  (project.to_string(), name.to_string())
}

fn names_in(items: &BTreeMap<Key, Option<Value>>, project: &str) -> Vec<String> {
  items
    .keys()
    .filter(|(p, _)| p == project)
    .map(|(_, n)| n.clone())
    .collect::<BTreeSet<_>>()
    .into_iter()
    .collect()
}

impl PlatformClient for FakePlatform {
  fn list_project_keys(&self) -> Result<Vec<String>, ClientError> {
    self.check()?;
    Ok(self.items.lock().unwrap().projects.keys().cloned().collect())
  }

  fn get_project(&self, project_key: &str) -> Result<Option<Value>, ClientError> {
    self.check()?;
    Ok(self.items.lock().unwrap().projects.get(project_key).cloned())
  }

  fn list_datasets(&self, project_key: &str) -> Result<Vec<String>, ClientError> {
    self.check()?;
    Ok(names_in(&self.items.lock().unwrap().datasets, project_key))
  }

  fn get_dataset(&self, project_key: &str, name: &str) -> Result<Option<Value>, ClientError> {
    self.check()?;
    Ok(self.items.lock().unwrap().datasets.get(&key(project_key, name)).cloned().flatten())
  }

  fn list_recipes(&self, project_key: &str) -> Result<Vec<String>, ClientError> {
    self.check()?;
    Ok(names_in(&self.items.lock().unwrap().recipes, project_key))
  }

  fn get_recipe(&self, project_key: &str, name: &str) -> Result<Option<Value>, ClientError> {
    self.check()?;
    Ok(self.items.lock().unwrap().recipes.get(&key(project_key, name)).cloned().flatten())
  }
}
