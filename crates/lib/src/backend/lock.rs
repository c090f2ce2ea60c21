//! File-based environment locking for mutual exclusion.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use super::{LockInfo, StateError, StateLockGuard};
use crate::consts::LOCK_RETRY_INTERVAL_MS;

/// An exclusive advisory lock on an environment's lock file.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct FileLock {
  file: File,
  lock_path: PathBuf,
  info: LockInfo,
}

impl FileLock {
  /// Acquire the lock at `lock_path`, retrying until `timeout` elapses.
  ///
  /// A zero timeout makes a single attempt.
  pub fn acquire(lock_path: &Path, environment: &str, holder: &str, timeout: Duration) -> Result<Self, StateError> {
    let location = lock_path.display().to_string();

    if let Some(parent) = lock_path.parent() {
      std::fs::create_dir_all(parent).map_err(|source| StateError::Lock {
        location: location.clone(),
        source,
      })?;
    }

    let file = wait_for_lock(
      environment,
      timeout,
      || {
        let file = OpenOptions::new()
          .read(true)
          .write(true)
          .create(true)
          .truncate(false)
          .open(lock_path)
          .map_err(|source| StateError::Lock {
            location: location.clone(),
            source,
          })?;

        match try_lock(&file) {
          Ok(()) => Ok(Some(file)),
          Err(err) if is_contention(&err) => Ok(None),
          Err(source) => Err(StateError::Lock {
            location: location.clone(),
            source,
          }),
        }
      },
      || read_lock_metadata(lock_path),
    )?;

    let info = LockInfo::new(holder, environment);
    write_metadata(&file, &info).map_err(|source| StateError::Lock {
      location: location.clone(),
      source,
    })?;

    debug!(lock = %location, holder, "acquired state lock");

    Ok(FileLock {
      file,
      lock_path: lock_path.to_path_buf(),
      info,
    })
  }

  /// Reads the lock metadata from the held file handle.
  ///
  /// Opening a second handle would fail on Windows, where the lock is
  /// mandatory, so diagnostics go through the handle we already hold.
  pub fn read_metadata(&self) -> io::Result<LockInfo> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

impl StateLockGuard for FileLock {
  fn info(&self) -> &LockInfo {
    &self.info
  }
}

/// Retry `try_acquire` until it yields a guard or `timeout` elapses.
///
/// `try_acquire` returns `Ok(None)` on contention. When the wait is over,
/// `current_holder` describes who holds the lock for the error message.
pub(crate) fn wait_for_lock<G>(
  environment: &str,
  timeout: Duration,
  mut try_acquire: impl FnMut() -> Result<Option<G>, StateError>,
  mut current_holder: impl FnMut() -> Option<LockInfo>,
) -> Result<G, StateError> {
  let started = Instant::now();
  let interval = Duration::from_millis(LOCK_RETRY_INTERVAL_MS);

  loop {
    if let Some(guard) = try_acquire()? {
      return Ok(guard);
    }

    let waited = started.elapsed();
    if waited >= timeout {
      let holder = current_holder();
      let waited = if timeout.is_zero() { Duration::ZERO } else { waited };
      return Err(StateError::contention(environment, holder.as_ref(), waited));
    }

    debug!(environment, waited_ms = waited.as_millis() as u64, "state lock busy, retrying");
    std::thread::sleep(interval.min(timeout - waited));
  }
}

fn write_metadata(file: &File, info: &LockInfo) -> io::Result<()> {
  file.set_len(0)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, info).map_err(io::Error::other)?;
  writer.flush()
}

fn read_lock_metadata(lock_path: &Path) -> Option<LockInfo> {
  let mut file = File::open(lock_path).ok()?;
  let mut contents = String::new();
  file.read_to_string(&mut contents).ok()?;
  serde_json::from_str(&contents).ok()
}

fn is_contention(err: &io::Error) -> bool {
  if err.kind() == io::ErrorKind::WouldBlock {
    return true;
  }
  // ERROR_LOCK_VIOLATION
  cfg!(windows) && err.raw_os_error() == Some(33)
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
    .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
