//! The store facade tying cache, producer, subscribers and cleaner together.

use crate::chain::Chain;
use crate::cleaner;
use crate::config::StoreConfig;
use crate::consumer::{ConsumerSlot, EventStream, Registry};
use crate::error::StreamError;
use crate::metrics::{MetricsSnapshot, StoreMetrics};
use crate::producer::{self, ProducerSignal};
use crate::storage::StorageEngine;
use crate::sync::{lock, Shutdown};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// State shared between the facade, its subscribers and the worker threads.
pub(crate) struct Shared<S: StorageEngine> {
    pub(crate) storage: S,
    pub(crate) config: StoreConfig,
    pub(crate) chain: Chain<S::Event>,
    pub(crate) registry: Registry<S::Event>,
    pub(crate) signal: ProducerSignal,
    pub(crate) shutdown: Shutdown,
    pub(crate) metrics: StoreMetrics,
    /// Guards the one-time start of the worker threads.
    workers_started: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_stream_id: AtomicU64,
}

impl<S: StorageEngine> Shared<S> {
    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.shutdown.is_closed()
    }

    /// Adds a subscriber to the tailing set, starting the workers on the
    /// first join and nudging the producer so the cache covers the newcomer.
    pub(crate) fn join_tailing(shared: &Arc<Self>, slot: &Arc<ConsumerSlot<S::Event>>) {
        shared.registry.add(Arc::clone(slot));
        Self::ensure_workers_started(shared);
        shared.signal.wake();
        if shared.config.enable_metrics {
            shared.metrics.add_wakeup();
        }
    }

    /// Starts the producer and cleaner threads at most once.
    fn ensure_workers_started(shared: &Arc<Self>) {
        if shared.is_closed() {
            return;
        }
        if shared
            .workers_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let producer_shared = Arc::clone(shared);
            let cleaner_shared = Arc::clone(shared);
            let mut workers = lock(&shared.workers);
            workers.push(std::thread::spawn(move || producer::run(&producer_shared)));
            workers.push(std::thread::spawn(move || cleaner::run(&cleaner_shared)));
        }
    }
}

/// Embedded event store facade.
///
/// Multiplexes any number of live subscribers over one backing storage
/// engine: a single background producer tails the engine into a bounded
/// in-memory cache chain, and subscribers either walk that chain or catch up
/// through private storage reads. See [`open_stream`](Self::open_stream) and
/// [`after_commit`](Self::after_commit).
pub struct TailStore<S: StorageEngine> {
    pub(crate) shared: Arc<Shared<S>>,
}

impl<S: StorageEngine> TailStore<S> {
    /// Creates a store over `storage` with the default configuration.
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, StoreConfig::default())
    }

    /// Creates a store over `storage` with the given configuration.
    pub fn with_config(storage: S, config: StoreConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                storage,
                config,
                chain: Chain::new(),
                registry: Registry::new(),
                signal: ProducerSignal::new(),
                shutdown: Shutdown::new(),
                metrics: StoreMetrics::default(),
                workers_started: AtomicBool::new(false),
                workers: Mutex::new(Vec::new()),
                next_stream_id: AtomicU64::new(0),
            }),
        }
    }

    /// Opens a live stream of every event positioned strictly after `start`
    /// (`None` meaning "from the very beginning").
    ///
    /// A subscriber whose start position is still inside the cache window
    /// joins the tail immediately; anyone else first catches up against
    /// storage through a private stream. The background producer is started
    /// lazily with the first tailing subscriber.
    pub fn open_stream(&self, start: Option<S::Token>) -> Result<EventStream<S>, StreamError> {
        if self.shared.is_closed() {
            return Err(StreamError::Closed);
        }
        let id = self.shared.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(ConsumerSlot::new(id, start.clone()));
        if let Some(node) = self.shared.chain.find_node(start.as_ref()) {
            lock(&slot.position).last_node = Some(node);
            Shared::join_tailing(&self.shared, &slot);
        }
        Ok(EventStream::new(Arc::clone(&self.shared), slot))
    }

    /// Notifies the store that events were committed to storage.
    ///
    /// Wakes the producer so subscribers see the new events without waiting
    /// out the fetch delay. A no-op on a closed store.
    pub fn after_commit(&self) {
        if self.shared.is_closed() {
            return;
        }
        self.shared.signal.wake();
        if self.shared.config.enable_metrics {
            self.shared.metrics.add_wakeup();
        }
    }

    /// Tokens of the oldest and newest cached events, if any.
    pub fn cached_window(&self) -> Option<(S::Token, S::Token)> {
        self.shared
            .chain
            .window()
            .map(|(oldest, newest)| (oldest.token().clone(), newest.token().clone()))
    }

    /// Number of events currently retained in the cache chain.
    pub fn cached_len(&self) -> usize {
        self.shared.chain.len()
    }

    /// Returns a metrics snapshot, or the default when metrics are disabled.
    pub fn metrics(&self) -> MetricsSnapshot {
        if self.shared.config.enable_metrics {
            self.shared.metrics.snapshot()
        } else {
            MetricsSnapshot::default()
        }
    }

    /// Returns `true` if the store has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Shuts the store down: detaches every tailing subscriber, stops the
    /// producer and cleaner, and wakes every blocked reader. Idempotent.
    ///
    /// Subscriber handles stay valid; their operations return empty results
    /// or [`StreamError::Closed`] from here on.
    pub fn close(&self) {
        if !self.shared.shutdown.begin() {
            return;
        }
        self.shared.registry.clear();
        self.shared.signal.wake();
        self.shared.chain.wake_all();
        let workers = std::mem::take(&mut *lock(&self.shared.workers));
        for handle in workers {
            let _joined = handle.join();
        }
    }
}

impl<S: StorageEngine> Drop for TailStore<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tailstore_mem::MemoryStorageEngine;

    #[test]
    fn test_close_is_idempotent() {
        let store = TailStore::new(MemoryStorageEngine::<String>::new());
        assert!(!store.is_closed());
        store.close();
        assert!(store.is_closed());
        store.close();
        assert!(store.is_closed());
    }

    #[test]
    fn test_after_commit_on_closed_store_is_a_no_op() {
        let store = TailStore::with_config(
            MemoryStorageEngine::<String>::new(),
            StoreConfig::default().with_metrics(true),
        );
        store.close();
        store.after_commit();
        assert_eq!(store.metrics().producer_wakeups, 0);
    }

    #[test]
    fn test_workers_start_once_and_stop_on_close() {
        let storage = MemoryStorageEngine::new();
        storage.append("first".to_string());
        let store = TailStore::with_config(
            storage,
            StoreConfig::default().with_fetch_delay(Duration::from_millis(20)),
        );

        let mut stream = store.open_stream(None).unwrap();
        assert!(stream.has_next_available(Duration::from_secs(5)).unwrap());
        stream.next_available().unwrap();
        // Exhausting the catch-up stream joins the tail and starts the workers
        let _ = stream.has_next_available(Duration::from_millis(50)).unwrap();
        assert!(store.shared.workers_started.load(Ordering::Acquire));

        // Close joins both workers; a second subscriber cannot revive them
        store.close();
        assert!(lock(&store.shared.workers).is_empty());
        assert!(store.open_stream(None).is_err());
    }
}
