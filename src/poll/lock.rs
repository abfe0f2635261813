//! Mutual exclusion usable from both async refresh paths and sync teardown paths.

use tokio::sync::{Mutex, MutexGuard};

/// Exclusive lock around a value, acquirable by awaiting or by blocking.
///
/// Both acquisition styles contend on the same mutex, so an async holder and
/// a blocking holder exclude each other. The guard releases on drop, which
/// covers early returns and `?` exits. The lock is not re-entrant: acquiring
/// it again while holding a guard deadlocks.
#[derive(Debug, Default)]
pub struct ExclusiveAsyncLock<T> {
  inner: Mutex<T>,
}

impl<T> ExclusiveAsyncLock<T> {
  pub fn new(value: T) -> Self {
    Self {
      inner: Mutex::new(value),
    }
  }

  /// Acquire from async code, suspending until the lock is free.
  pub async fn lock(&self) -> MutexGuard<'_, T> {
    self.inner.lock().await
  }

  /// Acquire from synchronous code, parking the thread until the lock is free.
  ///
  /// Must not be called from within an async runtime worker; use
  /// [`ExclusiveAsyncLock::lock`] there.
  pub fn lock_blocking(&self) -> MutexGuard<'_, T> {
    self.inner.blocking_lock()
  }
}
