//! Optional metrics for monitoring store activity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters updated by the producer, cleaner and subscribers.
///
/// Collection is gated by [`StoreConfig::enable_metrics`](crate::StoreConfig);
/// with metrics disabled the counters are never touched.
#[derive(Debug, Default)]
pub(crate) struct StoreMetrics {
    /// Events appended to the cache chain.
    events_cached: AtomicU64,
    /// Events evicted from the front of the chain.
    events_trimmed: AtomicU64,
    /// Subscribers detached from the tail for falling behind the window.
    laggards_detached: AtomicU64,
    /// Storage read failures observed by the producer.
    storage_errors: AtomicU64,
    /// Producer wake-ups requested through `after_commit` or rejoins.
    producer_wakeups: AtomicU64,
}

impl StoreMetrics {
    pub(crate) fn add_cached(&self, n: u64) {
        self.events_cached.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_trimmed(&self, n: u64) {
        self.events_trimmed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_laggard(&self) {
        self.laggards_detached.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_storage_error(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_wakeup(&self) {
        self.producer_wakeups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_cached: self.events_cached.load(Ordering::Relaxed),
            events_trimmed: self.events_trimmed.load(Ordering::Relaxed),
            laggards_detached: self.laggards_detached.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            producer_wakeups: self.producer_wakeups.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_cached: u64,
    pub events_trimmed: u64,
    pub laggards_detached: u64,
    pub storage_errors: u64,
    pub producer_wakeups: u64,
}
