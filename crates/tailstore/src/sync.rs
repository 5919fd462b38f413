//! Small synchronization helpers shared across the core.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Acquires a mutex, ignoring poisoning.
///
/// A poisoned lock only means another thread panicked while holding it; the
/// protected state here is kept consistent by the chain invariants, not by
/// unwind boundaries, so the guard is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One-way shutdown latch with a timed wait.
///
/// The flag is flipped under the lock before signalling so that a waiter
/// re-checking under the same lock can never miss the transition.
#[derive(Debug, Default)]
pub(crate) struct Shutdown {
    closed: AtomicBool,
    gate: Mutex<()>,
    cond: Condvar,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if shutdown has begun.
    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Begins shutdown. Returns `true` on the first call, `false` after.
    pub(crate) fn begin(&self) -> bool {
        let _guard = lock(&self.gate);
        let first = !self.closed.swap(true, Ordering::AcqRel);
        self.cond.notify_all();
        first
    }

    /// Sleeps for up to `timeout` or until shutdown begins.
    ///
    /// Returns `true` if the latch is closed when the wait ends.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = lock(&self.gate);
        if self.closed.load(Ordering::Acquire) {
            return true;
        }
        let _unused = self
            .cond
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        self.closed.load(Ordering::Acquire)
    }
}
