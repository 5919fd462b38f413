//! The background producer feeding the cache chain from storage.
//!
//! A single long-running thread repeatedly opens a tailing storage stream
//! starting after the cache tip (or after the slowest tailing subscriber
//! while the cache is empty), appends every event it yields as a cache node,
//! signals subscribers, and trims the window. Between unproductive fetches
//! it sleeps on its own condition for up to the configured fetch delay;
//! `wake` (driven by commit notifications and catch-up rejoins) is the only
//! edge that reliably shortens that sleep.

use crate::storage::StorageEngine;
use crate::store::Shared;
use crate::sync::lock;
use crossbeam_utils::CachePadded;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error};

/// The producer's wake-up flag and condition.
///
/// The flag is set under the lock before signalling, and the producer
/// re-checks it under the same lock before sleeping; a wake that arrives
/// while a fetch is in flight is therefore never lost, it just makes the
/// next sleep a no-op.
pub(crate) struct ProducerSignal {
    should_fetch: CachePadded<Mutex<bool>>,
    wakeup: Condvar,
}

impl ProducerSignal {
    pub(crate) fn new() -> Self {
        Self {
            should_fetch: CachePadded::new(Mutex::new(false)),
            wakeup: Condvar::new(),
        }
    }

    /// Requests an immediate fetch. Called on commit notification and when a
    /// caught-up subscriber rejoins the tail.
    pub(crate) fn wake(&self) {
        let mut should_fetch = lock(&self.should_fetch);
        *should_fetch = true;
        self.wakeup.notify_one();
    }

    fn set(&self) {
        *lock(&self.should_fetch) = true;
    }

    fn take(&self) -> bool {
        std::mem::take(&mut *lock(&self.should_fetch))
    }

    /// Sleeps for up to `timeout` unless a fetch request is already pending.
    fn wait_for_data(&self, timeout: Duration) {
        let guard = lock(&self.should_fetch);
        if !*guard {
            let _unused = self
                .wakeup
                .wait_timeout(guard, timeout)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Producer loop: fetch while requested, otherwise sleep until woken or the
/// fetch delay elapses. Exits when the store closes.
pub(crate) fn run<S: StorageEngine>(shared: &Arc<Shared<S>>) {
    debug!("event producer started");
    let mut data_found = false;
    while !shared.is_closed() {
        shared.signal.set();
        while shared.signal.take() {
            if shared.is_closed() {
                break;
            }
            data_found = fetch_data(shared);
        }
        if shared.is_closed() {
            break;
        }
        if !data_found {
            shared.signal.wait_for_data(shared.config.fetch_delay);
        }
    }
    debug!("event producer stopped");
}

/// One fetch round. Returns `true` iff the cache tip advanced.
///
/// Storage I/O happens outside every lock; the chain lock is only taken
/// briefly per appended node. A storage failure ends the round with no
/// partial node left behind; the next round retries.
fn fetch_data<S: StorageEngine>(shared: &Shared<S>) -> bool {
    if shared.registry.is_empty() {
        return false;
    }
    let events = match shared.storage.read_events(last_token(shared), true) {
        Ok(events) => events,
        Err(err) => {
            error!(%err, "storage read failed; retrying after delay");
            if shared.config.enable_metrics {
                shared.metrics.add_storage_error();
            }
            return false;
        }
    };
    let mut advanced = false;
    for item in events {
        if shared.is_closed() {
            break;
        }
        match item {
            Ok(event) => {
                let previous = last_token(shared);
                shared.chain.append(previous, event);
                advanced = true;
                let evicted = shared.chain.trim(shared.config.cached_events as u64);
                if shared.config.enable_metrics {
                    shared.metrics.add_cached(1);
                    shared.metrics.add_trimmed(evicted);
                }
            }
            Err(err) => {
                error!(%err, "storage stream failed mid-read; retrying after delay");
                if shared.config.enable_metrics {
                    shared.metrics.add_storage_error();
                }
                break;
            }
        }
    }
    // dropping `events` closes the storage stream
    advanced
}

/// The position the next fetch should read after.
///
/// With a cached tip, the producer tip-follows. With an empty cache it must
/// not skip anything a waiting tailing subscriber has not seen, so it falls
/// back to the minimum position across the tailing set, where a null
/// position sorts first and forces a read from the very beginning. An empty
/// tailing set yields null.
pub(crate) fn last_token<S: StorageEngine>(shared: &Shared<S>) -> Option<S::Token> {
    if let Some(newest) = shared.chain.newest() {
        return Some(newest.token().clone());
    }
    shared
        .registry
        .snapshot()
        .iter()
        .map(|slot| lock(&slot.position).last_token.clone())
        .min()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ConsumerSlot;
    use crate::{StoreConfig, TailStore};
    use tailstore_mem::{MemoryStorageEngine, SequenceToken, SequencedEvent};

    #[test]
    fn test_last_token_prefers_cache_tip() {
        let storage = MemoryStorageEngine::<String>::new();
        let store = TailStore::with_config(storage, StoreConfig::default());
        store
            .shared
            .registry
            .add(Arc::new(ConsumerSlot::new(1, Some(SequenceToken(1)))));

        store
            .shared
            .chain
            .append(None, SequencedEvent::new(SequenceToken(1), "a".into()));
        store.shared.chain.append(
            Some(SequenceToken(1)),
            SequencedEvent::new(SequenceToken(2), "b".into()),
        );

        // With a cached tip the slowest subscriber no longer matters
        assert_eq!(last_token(&store.shared), Some(SequenceToken(2)));
    }

    #[test]
    fn test_last_token_null_position_sorts_first() {
        let storage = MemoryStorageEngine::<String>::new();
        let store = TailStore::with_config(storage, StoreConfig::default());

        store
            .shared
            .registry
            .add(Arc::new(ConsumerSlot::new(1, Some(SequenceToken(5)))));
        assert_eq!(last_token(&store.shared), Some(SequenceToken(5)));

        store
            .shared
            .registry
            .add(Arc::new(ConsumerSlot::new(2, None)));
        // One unstarted subscriber forces a read from the very beginning
        assert_eq!(last_token(&store.shared), None);
    }

    #[test]
    fn test_last_token_empty_tailing_set() {
        let storage = MemoryStorageEngine::<String>::new();
        let store = TailStore::with_config(storage, StoreConfig::default());
        assert_eq!(last_token(&store.shared), None);
    }
}
