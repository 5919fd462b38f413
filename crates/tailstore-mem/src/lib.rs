//! In-memory storage engine for `tailstore`.
//!
//! A reference implementation of the [`StorageEngine`] contract backed by a
//! growable in-memory log: globally ordered, append-only, with blocking
//! tailing reads and non-blocking catch-up reads. Used by the `tailstore`
//! test-suite, benchmarks and demo; also handy as a fixture for applications
//! testing their own subscriber logic.
//!
//! Tokens are one-based sequence numbers: the first appended event carries
//! token 1, and `read_events(Some(SequenceToken(n)), _)` yields everything
//! from token `n + 1` on.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tailstore::{StorageEngine, StorageError, TrackedEvent};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One-based position in the global event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceToken(pub u64);

/// An event annotated with its sequence token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedEvent<P = String> {
    token: SequenceToken,
    payload: P,
}

impl<P> SequencedEvent<P> {
    pub fn new(token: SequenceToken, payload: P) -> Self {
        Self { token, payload }
    }

    pub fn token(&self) -> SequenceToken {
        self.token
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }
}

impl<P: Clone + Send + Sync + 'static> TrackedEvent for SequencedEvent<P> {
    type Token = SequenceToken;

    fn tracking_token(&self) -> &SequenceToken {
        &self.token
    }
}

struct EngineInner<P> {
    log: Mutex<Vec<SequencedEvent<P>>>,
    appended: Condvar,
    closed: AtomicBool,
    /// Upper bound on a single blocking wait inside a tailing read.
    block_interval: Duration,
    /// Failure injection: every other `read_events` call fails while set.
    fail_alternate_reads: AtomicBool,
    read_calls: AtomicU64,
}

/// Append-only in-memory event log implementing [`StorageEngine`].
///
/// Cloning yields another handle onto the same log, so a committer can keep
/// appending after the engine has been moved into a store.
pub struct MemoryStorageEngine<P = String> {
    inner: Arc<EngineInner<P>>,
}

impl<P> Clone for MemoryStorageEngine<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> Default for MemoryStorageEngine<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> MemoryStorageEngine<P> {
    /// Creates an empty log with a 100ms blocking-read interval.
    pub fn new() -> Self {
        Self::with_block_interval(Duration::from_millis(100))
    }

    /// Creates an empty log with a custom bound on a single blocking wait
    /// inside a tailing read.
    pub fn with_block_interval(block_interval: Duration) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                log: Mutex::new(Vec::new()),
                appended: Condvar::new(),
                closed: AtomicBool::new(false),
                block_interval,
                fail_alternate_reads: AtomicBool::new(false),
                read_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Appends one event and wakes blocked tailing readers.
    ///
    /// # Panics
    ///
    /// Panics if the engine has been closed.
    pub fn append(&self, payload: P) -> SequencedEvent<P>
    where
        P: Clone,
    {
        assert!(
            !self.inner.closed.load(Ordering::Acquire),
            "append on a closed engine"
        );
        let mut log = lock(&self.inner.log);
        let event = SequencedEvent::new(SequenceToken(log.len() as u64 + 1), payload);
        log.push(event.clone());
        drop(log);
        self.inner.appended.notify_all();
        event
    }

    /// Appends a batch, returning the assigned events.
    pub fn append_all(&self, payloads: impl IntoIterator<Item = P>) -> Vec<SequencedEvent<P>>
    where
        P: Clone,
    {
        payloads.into_iter().map(|payload| self.append(payload)).collect()
    }

    /// Token of the most recently appended event.
    pub fn latest_token(&self) -> Option<SequenceToken> {
        let log = lock(&self.inner.log);
        log.last().map(SequencedEvent::token)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.log).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.log).is_empty()
    }

    /// Closes the engine: further reads fail, blocked tailing readers wake
    /// and observe end-of-stream.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.appended.notify_all();
    }

    /// While enabled, every other `read_events` call fails with an injected
    /// read error. For resilience tests.
    pub fn fail_alternate_reads(&self, enabled: bool) {
        self.inner.fail_alternate_reads.store(enabled, Ordering::Relaxed);
    }
}

impl<P: Clone + Send + Sync + 'static> StorageEngine for MemoryStorageEngine<P> {
    type Token = SequenceToken;
    type Event = SequencedEvent<P>;
    type Events = MemoryEventStream<P>;

    fn read_events(
        &self,
        after: Option<SequenceToken>,
        may_block: bool,
    ) -> Result<MemoryEventStream<P>, StorageError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        let call = self.inner.read_calls.fetch_add(1, Ordering::Relaxed);
        if self.inner.fail_alternate_reads.load(Ordering::Relaxed) && call % 2 == 0 {
            return Err(StorageError::Read("injected read failure".to_string()));
        }
        Ok(MemoryEventStream {
            inner: Arc::clone(&self.inner),
            cursor: after.map_or(0, |token| token.0),
            may_block,
        })
    }
}

/// Lazy read over the log. Dropping the stream closes it.
pub struct MemoryEventStream<P> {
    inner: Arc<EngineInner<P>>,
    /// Number of events already consumed; the next event is `log[cursor]`.
    cursor: u64,
    may_block: bool,
}

impl<P: Clone> Iterator for MemoryEventStream<P> {
    type Item = Result<SequencedEvent<P>, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut log = lock(&self.inner.log);
        let deadline = Instant::now() + self.inner.block_interval;
        loop {
            if (self.cursor as usize) < log.len() {
                let event = log[self.cursor as usize].clone();
                self.cursor += 1;
                return Some(Ok(event));
            }
            if !self.may_block || self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return None,
            };
            let (guard, _timed_out) = self
                .inner
                .appended
                .wait_timeout(log, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            log = guard;
        }
    }
}
