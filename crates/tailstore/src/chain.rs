//! The singly linked cache chain of recently persisted events.
//!
//! # Synchronization strategy
//!
//! The chain has exactly one writer, the background producer, and any number
//! of readers (subscribers walking the tail, the cleaner inspecting the
//! window). The protocol:
//!
//! **Producer (append path):**
//! 1. Lock `ends`, compute the next index from the tip
//! 2. Publish the node through the tip's `next` link (`OnceLock::set` with
//!    release semantics; written exactly once, unset to set)
//! 3. Advance `newest` (and seed `oldest` on the first ever append)
//! 4. Unlock, then signal the subscriber condition
//!
//! **Reader (tail walk):**
//! - A reader holding a node follows `next` with `OnceLock::get` (acquire
//!   semantics) and never touches the `ends` lock; traversal is lock-free
//! - A reader without a node takes the `ends` lock briefly to rescan from
//!   `oldest`, and waits on the subscriber condition under that same lock.
//!   Re-checking under the lock before sleeping is what makes a concurrent
//!   append-then-signal impossible to miss
//!
//! **Trim:** the producer advances `oldest` forward along existing links,
//! dropping the chain's strong reference to the evicted prefix. A subscriber
//! still holding an evicted node keeps that suffix alive until it advances
//! or is detached; reclamation is by reference count alone.

use crate::invariants::{
    debug_assert_index_contiguous, debug_assert_link_published, debug_assert_token_advances,
    debug_assert_window_bounded,
};
use crate::storage::TrackedEvent;
use crate::sync::{lock, Shutdown};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

/// One link in the cache chain. Immutable except for the forward link,
/// which is written exactly once by the producer.
pub(crate) struct CachedNode<E: TrackedEvent> {
    /// Monotonically increasing position, used only for window arithmetic.
    index: u64,
    /// Token of the event cached immediately before this one (possibly one
    /// that has since been evicted). `None` for the first event ever seen.
    previous_token: Option<E::Token>,
    /// The cached event.
    event: E,
    /// Forward link, published once by the producer.
    next: OnceLock<Arc<CachedNode<E>>>,
}

impl<E: TrackedEvent> CachedNode<E> {
    #[inline]
    pub(crate) fn index(&self) -> u64 {
        self.index
    }

    #[inline]
    pub(crate) fn token(&self) -> &E::Token {
        self.event.tracking_token()
    }

    #[inline]
    pub(crate) fn previous_token(&self) -> Option<&E::Token> {
        self.previous_token.as_ref()
    }

    #[inline]
    pub(crate) fn event(&self) -> &E {
        &self.event
    }

    /// Follows the forward link (acquire read; lock-free).
    #[inline]
    pub(crate) fn next(&self) -> Option<Arc<CachedNode<E>>> {
        self.next.get().cloned()
    }
}

/// Chain ends. `oldest` is only `None` before the first ever append.
struct Ends<E: TrackedEvent> {
    oldest: Option<Arc<CachedNode<E>>>,
    newest: Option<Arc<CachedNode<E>>>,
}

/// The shared cache chain plus the subscriber condition.
pub(crate) struct Chain<E: TrackedEvent> {
    ends: Mutex<Ends<E>>,
    /// Signalled by the producer after every appended node.
    grown: Condvar,
}

impl<E: TrackedEvent> Chain<E> {
    pub(crate) fn new() -> Self {
        Self {
            ends: Mutex::new(Ends {
                oldest: None,
                newest: None,
            }),
            grown: Condvar::new(),
        }
    }

    pub(crate) fn oldest(&self) -> Option<Arc<CachedNode<E>>> {
        lock(&self.ends).oldest.clone()
    }

    pub(crate) fn newest(&self) -> Option<Arc<CachedNode<E>>> {
        lock(&self.ends).newest.clone()
    }

    /// Both ends at once, for window observability.
    pub(crate) fn window(&self) -> Option<(Arc<CachedNode<E>>, Arc<CachedNode<E>>)> {
        let ends = lock(&self.ends);
        match (&ends.oldest, &ends.newest) {
            (Some(oldest), Some(newest)) => Some((Arc::clone(oldest), Arc::clone(newest))),
            _ => None,
        }
    }

    /// Number of nodes currently reachable from `oldest`.
    pub(crate) fn len(&self) -> usize {
        let ends = lock(&self.ends);
        match (&ends.oldest, &ends.newest) {
            (Some(oldest), Some(newest)) => (newest.index - oldest.index + 1) as usize,
            _ => 0,
        }
    }

    /// Appends an event at the tip and signals waiting subscribers.
    ///
    /// Producer only. `previous_token` is the chain position immediately
    /// before this event as observed by the caller.
    pub(crate) fn append(&self, previous_token: Option<E::Token>, event: E) {
        let mut ends = lock(&self.ends);
        let node = match ends.newest.take() {
            Some(newest) => {
                debug_assert_token_advances!(newest.token(), event.tracking_token());
                let node = Arc::new(CachedNode {
                    index: newest.index + 1,
                    previous_token,
                    event,
                    next: OnceLock::new(),
                });
                debug_assert_index_contiguous!(newest.index, node.index);
                let published = newest.next.set(Arc::clone(&node)).is_ok();
                debug_assert_link_published!(published);
                node
            }
            None => {
                let node = Arc::new(CachedNode {
                    index: 0,
                    previous_token,
                    event,
                    next: OnceLock::new(),
                });
                ends.oldest = Some(Arc::clone(&node));
                node
            }
        };
        ends.newest = Some(node);
        drop(ends);
        self.grown.notify_all();
    }

    /// Advances `oldest` until the window holds fewer than `window` nodes.
    ///
    /// Producer only. Returns the number of evicted nodes.
    pub(crate) fn trim(&self, window: u64) -> u64 {
        let mut ends = lock(&self.ends);
        let newest_index = match &ends.newest {
            Some(newest) => newest.index,
            None => return 0,
        };
        let mut oldest = match ends.oldest.clone() {
            Some(oldest) => oldest,
            None => return 0,
        };
        let mut evicted = 0;
        while newest_index - oldest.index >= window {
            match oldest.next() {
                Some(next) => {
                    oldest = next;
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            ends.oldest = Some(oldest);
        }
        if let (Some(oldest), Some(newest)) = (&ends.oldest, &ends.newest) {
            debug_assert_window_bounded!(newest.index, oldest.index, window);
        }
        evicted
    }

    /// Locates the node carrying exactly `token`.
    ///
    /// Returns `None` for a null token, an empty chain, or a position that
    /// has already been evicted.
    pub(crate) fn find_node(&self, token: Option<&E::Token>) -> Option<Arc<CachedNode<E>>> {
        let token = token?;
        let oldest = self.oldest()?;
        if oldest.token() > token {
            // the requested position slid out of the window
            return None;
        }
        let mut current = Some(oldest);
        while let Some(node) = current {
            if node.token() == token {
                return Some(node);
            }
            current = node.next();
        }
        None
    }

    /// The node to deliver after the given position.
    ///
    /// With a node in hand this is a lock-free link follow; otherwise the
    /// chain is rescanned from `oldest` for the node whose `previous_token`
    /// matches `last_token` (a subscriber that just joined the tail has a
    /// token but no node yet).
    pub(crate) fn next_node(
        &self,
        last_node: Option<&Arc<CachedNode<E>>>,
        last_token: &Option<E::Token>,
    ) -> Option<Arc<CachedNode<E>>> {
        match last_node {
            Some(node) => node.next(),
            None => {
                let ends = lock(&self.ends);
                Self::successor_of(&ends, last_token)
            }
        }
    }

    /// Like [`next_node`](Self::next_node), but blocks on the subscriber
    /// condition for up to `timeout` until a successor is published.
    pub(crate) fn next_node_timeout(
        &self,
        last_node: Option<&Arc<CachedNode<E>>>,
        last_token: &Option<E::Token>,
        timeout: Duration,
        shutdown: &Shutdown,
    ) -> Option<Arc<CachedNode<E>>> {
        if let Some(node) = self.next_node(last_node, last_token) {
            return Some(node);
        }
        if timeout.is_zero() {
            return None;
        }
        let deadline = Instant::now() + timeout;
        let mut ends = lock(&self.ends);
        loop {
            let next = match last_node {
                Some(node) => node.next(),
                None => Self::successor_of(&ends, last_token),
            };
            if next.is_some() {
                return next;
            }
            if shutdown.is_closed() {
                return None;
            }
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return None,
            };
            let (guard, _timed_out) = self
                .grown
                .wait_timeout(ends, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            ends = guard;
        }
    }

    /// Wakes every subscriber blocked on the chain (used at shutdown).
    pub(crate) fn wake_all(&self) {
        self.grown.notify_all();
    }

    fn successor_of(
        ends: &Ends<E>,
        last_token: &Option<E::Token>,
    ) -> Option<Arc<CachedNode<E>>> {
        let mut current = ends.oldest.clone();
        while let Some(node) = current {
            if node.previous_token() == last_token.as_ref() {
                return Some(node);
            }
            current = node.next();
        }
        None
    }
}
