//! State manager.
//!
//! [`StateManager`] ties a [`StateBackend`] to a [`SynchronizerRegistry`]:
//! it loads and saves the environment's state under the environment lock,
//! reads live resources through the synchronizers, and diffs the two.
//!
//! # Sync concurrency
//!
//! Remote calls are blocking and run on `spawn_blocking` workers. Every
//! remote call holds one permit of a semaphore sized by
//! [`ManagerConfig::parallelism`]; permits are never held while waiting on
//! other tasks, so nested container/child work cannot starve itself.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backend::{LocalFileBackend, StateBackend, StateError};
use crate::config::ManagerConfig;
use crate::diff::{StateDiff, compute_diff};
use crate::resource::{Resource, ResourceError, ResourceId};
use crate::state::State;
use crate::sync::{PlatformClient, ResourceSynchronizer, SyncError, SynchronizerRegistry};

#[derive(Debug, Error)]
pub enum ManagerError {
  #[error(transparent)]
  State(#[from] StateError),

  #[error(transparent)]
  Sync(#[from] SyncError),

  #[error(transparent)]
  Resource(#[from] ResourceError),
}

pub struct StateManager {
  backend: Arc<dyn StateBackend>,
  registry: Arc<SynchronizerRegistry>,
  config: ManagerConfig,
}

impl StateManager {
  pub fn new(backend: Arc<dyn StateBackend>, registry: SynchronizerRegistry, config: ManagerConfig) -> Self {
    Self {
      backend,
      registry: Arc::new(registry),
      config,
    }
  }

  /// Manager over a [`LocalFileBackend`] in `config.state_dir` with the
  /// platform's default synchronizers.
  pub fn local(client: Arc<dyn PlatformClient>, config: ManagerConfig) -> Result<Self, ManagerError> {
    let backend = LocalFileBackend::new(&config.state_dir, &config.environment)?;
    let registry = SynchronizerRegistry::with_platform_defaults(client, &config.actor);
    Ok(Self::new(Arc::new(backend), registry, config))
  }

  pub fn config(&self) -> &ManagerConfig {
    &self.config
  }

  pub fn backend(&self) -> &Arc<dyn StateBackend> {
    &self.backend
  }

  pub fn registry(&self) -> &SynchronizerRegistry {
    &self.registry
  }

  /// Register an additional synchronizer, replacing one of the same type.
  pub fn register(&mut self, synchronizer: Arc<dyn ResourceSynchronizer>) {
    Arc::make_mut(&mut self.registry).register(synchronizer);
  }

  /// The persisted state, or an empty state for the configured environment
  /// when nothing was saved yet.
  pub fn load_state(&self) -> Result<State, ManagerError> {
    Ok(load_or_empty(self.backend.as_ref(), &self.config.environment)?)
  }

  /// Persist `state` under the environment lock.
  ///
  /// The state is stamped with the configured environment. It must
  /// supersede the persisted revision (see [`State::supersedes`]): a state
  /// loaded before another writer committed is rejected with
  /// [`StateError::Stale`] instead of overwriting that commit. On success
  /// `state` becomes the persisted revision and can be saved again.
  ///
  /// Loading, modifying and then calling this is not atomic; use
  /// [`update_state`](Self::update_state) for read-modify-write.
  pub fn save_state(&self, state: &mut State) -> Result<(), ManagerError> {
    state.set_environment(&self.config.environment);

    let _guard = self.backend.lock(&self.config.actor, self.config.lock_timeout)?;
    match self.backend.load() {
      Ok(persisted) if !state.supersedes(persisted.serial()) => {
        warn!(
          location = %self.backend.location(),
          persisted = persisted.serial(),
          base = ?state.base_serial(),
          attempted = state.serial(),
          "refusing stale save"
        );
        return Err(
          StateError::Stale {
            persisted: persisted.serial(),
            attempted: state.serial(),
          }
          .into(),
        );
      }
      Ok(_) => {}
      Err(e) if e.is_not_found() => {}
      Err(e) => return Err(e.into()),
    }
    self.backend.save(state)?;
    state.mark_persisted();

    info!(
      location = %self.backend.location(),
      serial = state.serial(),
      resources = state.len(),
      "saved state"
    );
    Ok(())
  }

  /// Load, modify and save the state as one transaction under the lock.
  pub fn update_state<F, R>(&self, f: F) -> Result<R, ManagerError>
  where
    F: FnOnce(&mut State) -> R,
  {
    transact(self.backend.as_ref(), &self.config, f)
  }

  /// Fetch the live revision of one resource, dispatching on its type prefix.
  pub async fn sync_resource(&self, id: &str) -> Result<Resource, ManagerError> {
    let id = ResourceId::parse(id)?;
    let synchronizer = self
      .registry
      .get(id.resource_type())
      .cloned()
      .ok_or_else(|| SyncError::UnknownResourceType(id.resource_type().to_string()))?;

    let resource = run_blocking(self.semaphore(), move || synchronizer.fetch(&id)).await?;
    debug!(id = %resource.id(), checksum = %resource.checksum(), "synced resource");
    Ok(resource)
  }

  /// Fetch a container and, optionally, every resource inside it.
  pub async fn sync_container(&self, container_key: &str, include_children: bool) -> Result<State, ManagerError> {
    info!(container = container_key, include_children, "syncing container");
    let resources = sync_container_task(
      Arc::clone(&self.registry),
      container_key.to_string(),
      include_children,
      self.semaphore(),
    )
    .await?;

    let state = self.assemble(resources);
    info!(container = container_key, resources = state.len(), "container synced");
    Ok(state)
  }

  /// Fetch every container with its children.
  ///
  /// Containers deleted while the sync runs are skipped.
  pub async fn sync_all(&self) -> Result<State, ManagerError> {
    let semaphore = self.semaphore();
    let container_sync = Arc::clone(self.registry.container().ok_or(SyncError::NoContainerType)?);
    let ids = run_blocking(Arc::clone(&semaphore), move || container_sync.list_ids(None)).await?;

    info!(containers = ids.len(), parallelism = self.config.parallelism, "syncing all containers");

    let mut join_set = JoinSet::new();
    for id in ids {
      let registry = Arc::clone(&self.registry);
      let semaphore = Arc::clone(&semaphore);
      join_set.spawn(async move {
        match sync_container_task(registry, id.container().to_string(), true, semaphore).await {
          Err(e) if e.is_not_found() => {
            warn!(container = %id, "container disappeared during sync, skipping");
            Ok(Vec::new())
          }
          other => other,
        }
      });
    }

    let batches = collect_join_results(join_set).await?;
    let state = self.assemble(batches.into_iter().flatten());
    info!(resources = state.len(), "sync complete");
    Ok(state)
  }

  /// Compare the persisted state with a fresh sync of the whole estate.
  pub async fn detect_drift(&self) -> Result<StateDiff, ManagerError> {
    let persisted = self.load_state()?;
    let live = self.sync_all().await?;
    let diff = compute_diff(&persisted, &live)?;

    let summary = diff.summary();
    if diff.has_changes() {
      warn!(
        environment = %self.config.environment,
        added = summary.added,
        removed = summary.removed,
        modified = summary.modified,
        "drift detected"
      );
    } else {
      info!(environment = %self.config.environment, resources = summary.unchanged, "no drift");
    }
    Ok(diff)
  }

  /// Replace the persisted state with a fresh sync, continuing its history.
  ///
  /// The fresh state takes a serial above the persisted one and inherits its
  /// lineage. Returns the saved state.
  pub async fn refresh(&self) -> Result<State, ManagerError> {
    let fresh = self.sync_all().await?;

    let backend = Arc::clone(&self.backend);
    let config = self.config.clone();
    let mut saved = tokio::task::spawn_blocking(move || {
      transact(backend.as_ref(), &config, move |persisted| {
        let mut next = fresh;
        next.supersede(persisted);
        *persisted = next;
        persisted.clone()
      })
    })
    .await
    .map_err(|e| SyncError::Task(e.to_string()))??;
    saved.mark_persisted();

    info!(serial = saved.serial(), resources = saved.len(), "refreshed state");
    Ok(saved)
  }

  fn semaphore(&self) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(self.config.parallelism.max(1)))
  }

  fn assemble(&self, resources: impl IntoIterator<Item = Resource>) -> State {
    let mut state = State::new(&self.config.environment);
    for resource in resources {
      state.add(resource);
    }
    state
  }
}

fn load_or_empty(backend: &dyn StateBackend, environment: &str) -> Result<State, StateError> {
  match backend.load() {
    Ok(state) => Ok(state),
    Err(e) if e.is_not_found() => {
      debug!(location = %backend.location(), "no persisted state, starting empty");
      let mut state = State::new(environment);
      state.mark_persisted();
      Ok(state)
    }
    Err(e) => Err(e),
  }
}

/// Lock, load (or start empty), apply `f`, save.
fn transact<F, R>(backend: &dyn StateBackend, config: &ManagerConfig, f: F) -> Result<R, ManagerError>
where
  F: FnOnce(&mut State) -> R,
{
  let _guard = backend.lock(&config.actor, config.lock_timeout)?;

  let mut state = load_or_empty(backend, &config.environment)?;
  let loaded_serial = state.serial();

  let result = f(&mut state);

  if state.serial() < loaded_serial {
    return Err(
      StateError::Stale {
        persisted: loaded_serial,
        attempted: state.serial(),
      }
      .into(),
    );
  }
  state.set_environment(&config.environment);
  backend.save(&state)?;

  debug!(
    location = %backend.location(),
    from_serial = loaded_serial,
    to_serial = state.serial(),
    "state transaction committed"
  );
  Ok(result)
}

/// Run a blocking remote call while holding one permit.
async fn run_blocking<T, F>(semaphore: Arc<Semaphore>, task: F) -> Result<T, SyncError>
where
  T: Send + 'static,
  F: FnOnce() -> Result<T, SyncError> + Send + 'static,
{
  let _permit = semaphore
    .acquire_owned()
    .await
    .map_err(|e| SyncError::Task(e.to_string()))?;
  tokio::task::spawn_blocking(task)
    .await
    .map_err(|e| SyncError::Task(e.to_string()))?
}

/// Collect task results, stopping at the first failure.
///
/// Returning early drops the set, which aborts the remaining tasks.
async fn collect_join_results<T: 'static>(mut join_set: JoinSet<Result<T, SyncError>>) -> Result<Vec<T>, SyncError> {
  let mut results = Vec::new();

  while let Some(join_result) = join_set.join_next().await {
    match join_result {
      Ok(Ok(value)) => results.push(value),
      Ok(Err(e)) => return Err(e),
      Err(e) => {
        error!(error = %e, "sync task panicked");
        return Err(SyncError::Task(e.to_string()));
      }
    }
  }

  Ok(results)
}

/// Container first, then child listings, then child fetches.
async fn sync_container_task(
  registry: Arc<SynchronizerRegistry>,
  container_key: String,
  include_children: bool,
  semaphore: Arc<Semaphore>,
) -> Result<Vec<Resource>, SyncError> {
  let container_sync = Arc::clone(registry.container().ok_or(SyncError::NoContainerType)?);
  let container_id = ResourceId::new(container_sync.resource_type(), &container_key, None)?;
  let container = run_blocking(Arc::clone(&semaphore), move || container_sync.fetch(&container_id)).await?;

  let mut resources = vec![container];
  if !include_children {
    return Ok(resources);
  }

  let mut listings = JoinSet::new();
  for synchronizer in registry.children() {
    let synchronizer = Arc::clone(synchronizer);
    let key = container_key.clone();
    let semaphore = Arc::clone(&semaphore);
    listings.spawn(async move {
      let lister = Arc::clone(&synchronizer);
      let ids = run_blocking(semaphore, move || lister.list_ids(Some(&key))).await?;
      Ok::<_, SyncError>((synchronizer, ids))
    });
  }
  let listings = collect_join_results(listings).await?;

  let mut fetches = JoinSet::new();
  for (synchronizer, ids) in listings {
    debug!(
      container = %container_key,
      resource_type = synchronizer.resource_type(),
      count = ids.len(),
      "listed resources"
    );
    for id in ids {
      let synchronizer = Arc::clone(&synchronizer);
      let semaphore = Arc::clone(&semaphore);
      fetches.spawn(async move {
        let target = id.clone();
        match run_blocking(semaphore, move || synchronizer.fetch(&target)).await {
          Ok(resource) => Ok(Some(resource)),
          Err(e) if e.is_not_found() => {
            warn!(id = %id, "resource disappeared between listing and fetch, skipping");
            Ok(None)
          }
          Err(e) => Err(e),
        }
      });
    }
  }
  resources.extend(collect_join_results(fetches).await?.into_iter().flatten());

  Ok(resources)
}
