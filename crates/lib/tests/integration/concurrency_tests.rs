use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use stateplane_lib::{
  Attributes, ManagerConfig, ManagerError, MemoryBackend, Resource, State, StateBackend, StateError, StateManager,
  SynchronizerRegistry,
};

use super::common::TestEnv;

fn dataset(name: &str) -> Resource {
  Resource::new("dataset", &format!("dataset.SALES.{}", name), Attributes::new()).unwrap()
}

fn memory_manager(backend: &MemoryBackend) -> StateManager {
  let config = ManagerConfig::new("prod")
    .with_actor("worker")
    .with_lock_timeout(Duration::from_secs(10));
  StateManager::new(Arc::new(backend.clone()), SynchronizerRegistry::new(), config)
}

#[test]
fn unlocked_read_modify_write_loses_updates() {
  let backend = MemoryBackend::new("prod").unwrap();
  backend.save(&State::new("prod")).unwrap();
  let barrier = Arc::new(Barrier::new(2));

  let writers: Vec<_> = ["FROM_A", "FROM_B"]
    .into_iter()
    .map(|name| {
      let backend = backend.clone();
      let barrier = Arc::clone(&barrier);
      thread::spawn(move || {
        let mut state = backend.load().unwrap();
        // Both writers hold the same snapshot before either saves.
        barrier.wait();
        state.add(dataset(name));
        backend.save(&state).unwrap();
      })
    })
    .collect();
  for writer in writers {
    writer.join().unwrap();
  }

  let state = backend.load().unwrap();
  assert_eq!(state.len(), 1, "one of the two additions is lost");
  assert_eq!(state.serial(), 1);
}

#[test]
fn concurrent_save_state_rejects_the_overtaken_writer() {
  let backend = MemoryBackend::new("prod").unwrap();
  let barrier = Arc::new(Barrier::new(2));

  let writers: Vec<_> = ["FROM_A", "FROM_B"]
    .into_iter()
    .map(|name| {
      let manager = memory_manager(&backend);
      let barrier = Arc::clone(&barrier);
      thread::spawn(move || {
        let mut state = manager.load_state().unwrap();
        barrier.wait();
        state.add(dataset(name));
        (name, manager.save_state(&mut state))
      })
    })
    .collect();
  let outcomes: Vec<_> = writers.into_iter().map(|w| w.join().unwrap()).collect();

  let winners: Vec<&str> = outcomes.iter().filter(|(_, r)| r.is_ok()).map(|(n, _)| *n).collect();
  assert_eq!(winners.len(), 1, "exactly one writer commits");
  let (loser, err) = outcomes.iter().find(|(_, r)| r.is_err()).unwrap();
  assert!(matches!(
    err,
    Err(ManagerError::State(StateError::Stale {
      persisted: 1,
      attempted: 1
    }))
  ));

  let state = backend.load().unwrap();
  assert_eq!(state.len(), 1);
  assert!(state.contains(&format!("dataset.SALES.{}", winners[0])));

  // The rejected writer redoes its change on top of the committed revision.
  memory_manager(&backend)
    .update_state(|state| {
      state.add(dataset(loser));
    })
    .unwrap();
  let state = backend.load().unwrap();
  assert_eq!(state.len(), 2);
  assert_eq!(state.serial(), 2);
}

#[test]
fn update_state_serializes_writers() {
  let backend = MemoryBackend::new("prod").unwrap();
  let manager = Arc::new(memory_manager(&backend));
  let writers = 8;
  let barrier = Arc::new(Barrier::new(writers));

  let handles: Vec<_> = (0..writers)
    .map(|i| {
      let manager = Arc::clone(&manager);
      let barrier = Arc::clone(&barrier);
      thread::spawn(move || {
        barrier.wait();
        manager
          .update_state(|state| {
            state.add(dataset(&format!("D{}", i)));
          })
          .unwrap();
      })
    })
    .collect();
  for handle in handles {
    handle.join().unwrap();
  }

  let state = manager.load_state().unwrap();
  assert_eq!(state.len(), writers);
  assert_eq!(state.serial(), writers as u64);
  assert!(backend.lock_holder().is_none());
}

#[test]
fn update_state_serializes_writers_on_local_files() {
  let env = TestEnv::customer_analytics();
  let writers = 4;
  let barrier = Arc::new(Barrier::new(writers));

  // Separate managers, separate lock file handles.
  let handles: Vec<_> = (0..writers)
    .map(|i| {
      let manager = env.manager(env.config("prod"));
      let barrier = Arc::clone(&barrier);
      thread::spawn(move || {
        barrier.wait();
        manager
          .update_state(|state| {
            state.add(dataset(&format!("L{}", i)));
          })
          .unwrap();
      })
    })
    .collect();
  for handle in handles {
    handle.join().unwrap();
  }

  let state = env.manager(env.config("prod")).load_state().unwrap();
  assert_eq!(state.len(), writers);
  assert_eq!(state.serial(), writers as u64);
}

#[test]
fn save_of_an_outdated_snapshot_is_stale() {
  let backend = MemoryBackend::new("prod").unwrap();
  let slow = memory_manager(&backend);
  let fast = memory_manager(&backend);

  let mut snapshot = slow.load_state().unwrap();

  fast
    .update_state(|state| {
      state.add(dataset("FAST_1"));
      state.add(dataset("FAST_2"));
    })
    .unwrap();

  snapshot.add(dataset("SLOW"));
  let err = slow.save_state(&mut snapshot).unwrap_err();
  assert!(matches!(
    err,
    ManagerError::State(StateError::Stale {
      persisted: 2,
      attempted: 1
    })
  ));
  assert_eq!(backend.load().unwrap().len(), 2);
}

#[test]
fn waiting_writer_times_out_with_distinct_error() {
  let backend = MemoryBackend::new("prod").unwrap();
  let config = ManagerConfig::new("prod")
    .with_actor("late")
    .with_lock_timeout(Duration::from_millis(200));
  let manager = StateManager::new(Arc::new(backend.clone()), SynchronizerRegistry::new(), config);

  let _held = backend.lock("long-running-job", Duration::ZERO).unwrap();
  let err = manager.update_state(|_| ()).unwrap_err();

  match err {
    ManagerError::State(StateError::LockTimeout { holder, waited, .. }) => {
      assert!(holder.contains("long-running-job"));
      assert!(waited >= Duration::from_millis(200));
    }
    other => panic!("expected LockTimeout, got: {}", other),
  }
}
