//! Configuration for the store.

use std::time::Duration;

/// Configuration for [`TailStore`](crate::TailStore).
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Maximum number of events retained in the shared cache chain.
    ///
    /// Subscribers that fall further behind than this window are detached
    /// from the tail and catch up against storage directly.
    ///
    /// Default: 10_000
    pub cached_events: usize,

    /// Maximum idle interval of the producer between storage probes.
    ///
    /// Commits signalled through `after_commit` shorten the sleep; this is
    /// the safety net for commits the store is never told about.
    ///
    /// Default: 1s
    pub fetch_delay: Duration,

    /// Period of the cleanup task that detaches fallen-behind subscribers.
    ///
    /// Default: 10s
    pub cleanup_delay: Duration,

    /// Enable metrics collection (slight overhead)
    pub enable_metrics: bool,
}

impl StoreConfig {
    /// Creates a new configuration with custom settings.
    ///
    /// # Panics
    ///
    /// Panics if `cached_events` is zero or either delay is zero.
    pub const fn new(cached_events: usize, fetch_delay: Duration, cleanup_delay: Duration) -> Self {
        assert!(cached_events > 0, "cached_events must be positive");
        assert!(!fetch_delay.is_zero(), "fetch_delay must be non-zero");
        assert!(!cleanup_delay.is_zero(), "cleanup_delay must be non-zero");

        Self {
            cached_events,
            fetch_delay,
            cleanup_delay,
            enable_metrics: false,
        }
    }

    /// Sets the cache window size.
    pub fn with_cached_events(mut self, cached_events: usize) -> Self {
        assert!(cached_events > 0, "cached_events must be positive");
        self.cached_events = cached_events;
        self
    }

    /// Sets the maximum producer idle interval.
    pub fn with_fetch_delay(mut self, fetch_delay: Duration) -> Self {
        assert!(!fetch_delay.is_zero(), "fetch_delay must be non-zero");
        self.fetch_delay = fetch_delay;
        self
    }

    /// Sets the cleanup task period.
    pub fn with_cleanup_delay(mut self, cleanup_delay: Duration) -> Self {
        assert!(!cleanup_delay.is_zero(), "cleanup_delay must be non-zero");
        self.cleanup_delay = cleanup_delay;
        self
    }

    /// Enables or disables metrics collection.
    pub fn with_metrics(mut self, enable_metrics: bool) -> Self {
        self.enable_metrics = enable_metrics;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cached_events: 10_000,
            fetch_delay: Duration::from_millis(1000),
            cleanup_delay: Duration::from_millis(10_000),
            enable_metrics: false,
        }
    }
}
