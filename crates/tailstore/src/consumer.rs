//! Subscriber streams over the shared cache.
//!
//! A subscriber is in one of two modes:
//!
//! - **Tailing**: it walks cache nodes by following forward links and blocks
//!   on the shared subscriber condition when it reaches the tip.
//! - **Private**: it reads a direct, non-blocking storage stream to catch up,
//!   rejoining the tail once that stream is exhausted.
//!
//! The mode is decided per fetch: a subscriber is tailing while it is in the
//! tailing set and its position still falls inside the cache window. The
//! cleaner may detach a fallen-behind subscriber at any time; the next fetch
//! then observes the detachment and drops to private mode.

use crate::chain::CachedNode;
use crate::error::StreamError;
use crate::storage::{StorageEngine, TrackedEvent};
use crate::store::Shared;
use crate::sync::lock;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Wait slice for unbounded blocking reads; each slice re-checks the closed
/// flag so shutdown is never missed.
const WAIT_SLICE: Duration = Duration::from_secs(1);

/// Position of one subscriber in the global stream.
pub(crate) struct Position<E: TrackedEvent> {
    /// Token of the last delivered event, or the starting token.
    pub(crate) last_token: Option<E::Token>,
    /// Last delivered cache node while tailing; cleared on detach.
    pub(crate) last_node: Option<Arc<CachedNode<E>>>,
}

/// Per-subscriber state shared with the producer (which reads `last_token`)
/// and the cleaner (which clears `last_node` on detach).
pub(crate) struct ConsumerSlot<E: TrackedEvent> {
    pub(crate) id: u64,
    pub(crate) position: Mutex<Position<E>>,
}

impl<E: TrackedEvent> ConsumerSlot<E> {
    pub(crate) fn new(id: u64, start: Option<E::Token>) -> Self {
        Self {
            id,
            position: Mutex::new(Position {
                last_token: start,
                last_node: None,
            }),
        }
    }
}

/// The set of subscribers currently believed to be at or near the tail.
///
/// Membership is advisory; the authoritative tailing check also verifies the
/// subscriber has not fallen behind the cache window. Iteration works on a
/// snapshot, so mutation during a sweep is safe.
pub(crate) struct Registry<E: TrackedEvent> {
    tailing: Mutex<Vec<Arc<ConsumerSlot<E>>>>,
}

impl<E: TrackedEvent> Registry<E> {
    pub(crate) fn new() -> Self {
        Self {
            tailing: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, slot: Arc<ConsumerSlot<E>>) {
        let mut tailing = lock(&self.tailing);
        if !tailing.iter().any(|existing| existing.id == slot.id) {
            tailing.push(slot);
        }
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut tailing = lock(&self.tailing);
        let before = tailing.len();
        tailing.retain(|slot| slot.id != id);
        tailing.len() != before
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        lock(&self.tailing).iter().any(|slot| slot.id == id)
    }

    pub(crate) fn is_empty(&self) -> bool {
        lock(&self.tailing).is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<ConsumerSlot<E>>> {
        lock(&self.tailing).clone()
    }

    pub(crate) fn clear(&self) {
        lock(&self.tailing).clear();
    }
}

/// A live subscription to the store's global event stream.
///
/// Delivers every event positioned strictly after the subscription's start
/// token, exactly once, in token order, until closed. Obtained from
/// [`TailStore::open_stream`](crate::TailStore::open_stream).
pub struct EventStream<S: StorageEngine> {
    shared: Arc<Shared<S>>,
    slot: Arc<ConsumerSlot<S::Event>>,
    /// At most one buffered event awaiting consumption; makes `peek`
    /// idempotent.
    peeked: Option<S::Event>,
    /// Present iff the subscriber is in private catch-up mode.
    private: Option<S::Events>,
    closed: bool,
}

impl<S: StorageEngine> EventStream<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>, slot: Arc<ConsumerSlot<S::Event>>) -> Self {
        Self {
            shared,
            slot,
            peeked: None,
            private: None,
            closed: false,
        }
    }

    /// Returns the next event without consuming it, if one is already
    /// available. Repeated calls return the same event until
    /// [`next_available`](Self::next_available) consumes it.
    pub fn peek(&mut self) -> Result<Option<S::Event>, StreamError> {
        if self.peeked.is_none() {
            self.peeked = self.peek_event(Duration::ZERO)?;
        }
        Ok(self.peeked.clone())
    }

    /// Waits up to `timeout` for an event to become available.
    ///
    /// On `true`, the event is buffered and the next
    /// [`next_available`](Self::next_available) returns without blocking.
    pub fn has_next_available(&mut self, timeout: Duration) -> Result<bool, StreamError> {
        if self.peeked.is_none() {
            self.peeked = self.peek_event(timeout)?;
        }
        Ok(self.peeked.is_some())
    }

    /// Blocks until the next event is available and consumes it.
    ///
    /// Only new data or closing the store unblocks this call; a closed store
    /// yields [`StreamError::Closed`].
    pub fn next_available(&mut self) -> Result<S::Event, StreamError> {
        loop {
            if let Some(event) = self.peeked.take() {
                return Ok(event);
            }
            if self.closed || self.shared.is_closed() {
                return Err(StreamError::Closed);
            }
            self.peeked = self.peek_event(WAIT_SLICE)?;
        }
    }

    /// The token of the last delivered event (or the starting token).
    pub fn position(&self) -> Option<S::Token> {
        lock(&self.slot.position).last_token.clone()
    }

    /// Whether this subscriber currently reads from the shared cache rather
    /// than a private catch-up stream.
    pub fn is_tailing(&self) -> bool {
        if !self.shared.registry.contains(self.slot.id) {
            return false;
        }
        let position = lock(&self.slot.position);
        match position.last_token.as_ref() {
            None => true,
            Some(last) => match self.shared.chain.oldest() {
                // Empty cache: the producer seeds it from the slowest tailing
                // position, so waiting on the tail is productive.
                None => true,
                Some(oldest) => oldest.previous_token() < Some(last),
            },
        }
    }

    /// Closes the subscription: detaches from the tailing set and releases
    /// any private storage stream. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.private = None;
        self.shared.registry.remove(self.slot.id);
    }

    /// One fetch attempt with the given timeout; `None` means nothing became
    /// available in time (or the stream is closed).
    fn peek_event(&mut self, timeout: Duration) -> Result<Option<S::Event>, StreamError> {
        if self.closed || self.shared.is_closed() {
            return Ok(None);
        }
        if self.is_tailing() {
            Ok(self.peek_global(timeout))
        } else {
            self.peek_private(timeout)
        }
    }

    /// Tailing path: follow the cache chain, waiting on the subscriber
    /// condition when the tip is reached.
    fn peek_global(&mut self, timeout: Duration) -> Option<S::Event> {
        let (last_node, last_token) = {
            let position = lock(&self.slot.position);
            (position.last_node.clone(), position.last_token.clone())
        };
        let node = self.shared.chain.next_node_timeout(
            last_node.as_ref(),
            &last_token,
            timeout,
            &self.shared.shutdown,
        )?;
        // A detach may have raced the wait: the event is still delivered and
        // the token advances, but the node reference is only kept while the
        // subscriber remains in the tailing set.
        let still_tailing = self.shared.registry.contains(self.slot.id);
        let mut position = lock(&self.slot.position);
        if still_tailing {
            position.last_node = Some(Arc::clone(&node));
        }
        position.last_token = Some(node.token().clone());
        Some(node.event().clone())
    }

    /// Private path: drain a direct storage stream, then rejoin the tail.
    fn peek_private(&mut self, timeout: Duration) -> Result<Option<S::Event>, StreamError> {
        if self.private.is_none() {
            let after = lock(&self.slot.position).last_token.clone();
            let stream = self.shared.storage.read_events(after, false)?;
            debug!(subscriber = self.slot.id, "opened private catch-up stream");
            self.private = Some(stream);
        }
        match self.private.as_mut().and_then(|stream| stream.next()) {
            Some(Ok(event)) => {
                lock(&self.slot.position).last_token = Some(event.tracking_token().clone());
                Ok(Some(event))
            }
            Some(Err(err)) => {
                // Drop the failed stream so a retried fetch reopens cleanly
                // from the last delivered position.
                self.private = None;
                Err(err.into())
            }
            None => {
                self.private = None;
                {
                    let mut position = lock(&self.slot.position);
                    position.last_node = self.shared.chain.find_node(position.last_token.as_ref());
                }
                Shared::join_tailing(&self.shared, &self.slot);
                debug!(subscriber = self.slot.id, "caught up; rejoined the tail");
                if timeout.is_zero() {
                    Ok(None)
                } else {
                    self.peek_event(timeout)
                }
            }
        }
    }
}

impl<S: StorageEngine> Iterator for EventStream<S> {
    type Item = Result<S::Event, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_available() {
            Ok(event) => Some(Ok(event)),
            Err(StreamError::Closed) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl<S: StorageEngine> Drop for EventStream<S> {
    fn drop(&mut self) {
        self.close();
    }
}
