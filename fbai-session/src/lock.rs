//! Mutual exclusion for multi-step session operations
//!
//! Writers that touch more than one key (login, refresh, validation,
//! logout, preserved operations) hold the lock for their whole duration.
//! The lock is not reentrant: code already holding a guard must call the
//! manager's internal `*_locked` helpers instead of the public operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

#[derive(Debug, Default)]
pub struct SessionLock {
    inner: Mutex<()>,
    acquisitions: AtomicU64,
}

/// Held while an operation owns the session. Released on drop.
#[derive(Debug)]
pub struct SessionLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    operation: &'static str,
    acquired_at: Instant,
}

impl SessionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock. Waiters are served in FIFO order.
    pub async fn acquire(&self, operation: &'static str) -> SessionLockGuard<'_> {
        let guard = self.inner.lock().await;
        self.granted(guard, operation)
    }

    /// Take the lock only if it is free right now
    pub fn try_acquire(&self, operation: &'static str) -> Option<SessionLockGuard<'_>> {
        self.inner
            .try_lock()
            .ok()
            .map(|guard| self.granted(guard, operation))
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// Total number of times the lock has been granted
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    fn granted<'a>(
        &'a self,
        guard: MutexGuard<'a, ()>,
        operation: &'static str,
    ) -> SessionLockGuard<'a> {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        trace!(operation, "Session lock acquired");
        SessionLockGuard {
            _guard: guard,
            operation,
            acquired_at: Instant::now(),
        }
    }
}

impl SessionLockGuard<'_> {
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl Drop for SessionLockGuard<'_> {
    fn drop(&mut self) {
        trace!(
            operation = self.operation,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Session lock released"
        );
    }
}
