//! Shared test helpers for library integration tests.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;
use stateplane_lib::sync::ClientError;
use stateplane_lib::{ManagerConfig, PlatformClient, StateManager};
use tempfile::TempDir;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Read fixture content.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

#[derive(Debug, Default, Clone)]
struct Project {
  summary: Value,
  datasets: BTreeMap<String, Value>,
  recipes: BTreeMap<String, Value>,
}

/// In-memory platform loaded from a fixture.
///
/// Every call sleeps for `latency` and the peak number of calls in flight
/// is recorded.
#[derive(Default)]
pub struct FakePlatform {
  projects: Mutex<BTreeMap<String, Project>>,
  latency: Duration,
  in_flight: AtomicUsize,
  peak_in_flight: AtomicUsize,
  calls: AtomicUsize,
}

impl FakePlatform {
  /// Load `{"KEY": {"summary": {..}, "datasets": {..}, "recipes": {..}}}`.
  pub fn from_fixture(name: &str) -> Self {
    let raw: BTreeMap<String, Value> = serde_json::from_str(&fixture_content(name)).unwrap();
    let projects = raw
      .into_iter()
      .map(|(key, value)| {
        let project = Project {
          summary: value["summary"].clone(),
          datasets: serde_json::from_value(value["datasets"].clone()).unwrap_or_default(),
          recipes: serde_json::from_value(value["recipes"].clone()).unwrap_or_default(),
        };
        (key, project)
      })
      .collect();
    Self {
      projects: Mutex::new(projects),
      ..Self::default()
    }
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  /// Apply `f` to a dataset's settings in place.
  pub fn edit_dataset(&self, project: &str, name: &str, f: impl FnOnce(&mut Value)) {
    let mut projects = self.projects.lock().unwrap();
    let settings = projects
      .get_mut(project)
      .and_then(|p| p.datasets.get_mut(name))
      .unwrap_or_else(|| panic!("no dataset {}.{}", project, name));
    f(settings);
  }

  pub fn put_dataset(&self, project: &str, name: &str, settings: Value) {
    let mut projects = self.projects.lock().unwrap();
    projects
      .entry(project.to_string())
      .or_default()
      .datasets
      .insert(name.to_string(), settings);
  }

  pub fn remove_recipe(&self, project: &str, name: &str) {
    if let Some(p) = self.projects.lock().unwrap().get_mut(project) {
      p.recipes.remove(name);
    }
  }

  pub fn peak_in_flight(&self) -> usize {
    self.peak_in_flight.load(Ordering::SeqCst)
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  fn call<T>(&self, f: impl FnOnce(&BTreeMap<String, Project>) -> T) -> Result<T, ClientError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    if !self.latency.is_zero() {
      std::thread::sleep(self.latency);
    }
    let result = f(&self.projects.lock().unwrap());
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
    Ok(result)
  }
}

impl PlatformClient for FakePlatform {
  fn list_project_keys(&self) -> Result<Vec<String>, ClientError> {
    self.call(|p| p.keys().cloned().collect())
  }

  fn get_project(&self, project_key: &str) -> Result<Option<Value>, ClientError> {
    self.call(|p| p.get(project_key).map(|p| p.summary.clone()))
  }

  fn list_datasets(&self, project_key: &str) -> Result<Vec<String>, ClientError> {
    self.call(|p| p.get(project_key).map(|p| p.datasets.keys().cloned().collect()).unwrap_or_default())
  }

  fn get_dataset(&self, project_key: &str, name: &str) -> Result<Option<Value>, ClientError> {
    self.call(|p| p.get(project_key).and_then(|p| p.datasets.get(name).cloned()))
  }

  fn list_recipes(&self, project_key: &str) -> Result<Vec<String>, ClientError> {
    self.call(|p| p.get(project_key).map(|p| p.recipes.keys().cloned().collect()).unwrap_or_default())
  }

  fn get_recipe(&self, project_key: &str, name: &str) -> Result<Option<Value>, ClientError> {
    self.call(|p| p.get(project_key).and_then(|p| p.recipes.get(name).cloned()))
  }
}

/// Isolated test environment.
///
/// Each test gets its own temporary state directory and platform.
pub struct TestEnv {
  pub temp: TempDir,
  pub platform: Arc<FakePlatform>,
}

impl TestEnv {
  pub fn new(platform: FakePlatform) -> Self {
    Self {
      temp: TempDir::new().unwrap(),
      platform: Arc::new(platform),
    }
  }

  /// The customer analytics estate.
  pub fn customer_analytics() -> Self {
    Self::new(FakePlatform::from_fixture("customer_analytics.json"))
  }

  pub fn state_dir(&self) -> PathBuf {
    self.temp.path().join("state")
  }

  pub fn config(&self, environment: &str) -> ManagerConfig {
    ManagerConfig::new(environment)
      .with_actor("ci-runner")
      .with_state_dir(self.state_dir())
      .with_lock_timeout(Duration::from_secs(5))
  }

  /// A manager over the local-file backend.
  pub fn manager(&self, config: ManagerConfig) -> StateManager {
    let client: Arc<dyn PlatformClient> = Arc::clone(&self.platform) as Arc<dyn PlatformClient>;
    StateManager::local(client, config).unwrap()
  }
}
