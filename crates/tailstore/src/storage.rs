//! Contracts between the store facade and the durable storage engine.
//!
//! The core never persists anything itself; it reads the globally ordered
//! event stream from an engine implementing [`StorageEngine`] and fans it out
//! to subscribers. Two read modes exist:
//!
//! - **Tailing** (`may_block = true`): the returned stream is long-lived and
//!   may block briefly inside `next()` while waiting for newly committed
//!   events. Used by the background producer.
//! - **Catch-up** (`may_block = false`): the stream yields only currently
//!   persisted events and then ends. Used by consumers replaying history
//!   through a private stream.
//!
//! Streams are lazy iterators; dropping one closes it.

use crate::error::StorageError;
use std::fmt;

/// A position in the globally ordered event stream.
///
/// Tokens are opaque to the core: all it needs is total order (`Ord`, where
/// "is after" is `>`), equality, and cheap cloning. "Before everything" is
/// expressed as `Option::<T>::None`, which sorts before every `Some` under
/// `Option`'s derived ordering.
pub trait TrackingToken: Clone + Eq + Ord + fmt::Debug + Send + Sync + 'static {}

impl<T> TrackingToken for T where T: Clone + Eq + Ord + fmt::Debug + Send + Sync + 'static {}

/// An event message annotated with the token of its position in the global
/// stream.
///
/// Events are cloned once per subscriber on delivery; implementations with a
/// heavy payload should make cloning cheap (`Arc` the payload).
pub trait TrackedEvent: Clone + Send + Sync + 'static {
    /// Token type ordering this event against the rest of the stream.
    type Token: TrackingToken;

    /// The position of this event in the global stream.
    fn tracking_token(&self) -> &Self::Token;
}

/// The durable engine backing a store.
///
/// `read_events(after, may_block)` opens a stream of every event positioned
/// strictly after `after` (`None` meaning "from the very beginning"), in
/// token order. The engine owns durability, ordering, and transactions; the
/// core only consumes.
pub trait StorageEngine: Send + Sync + 'static {
    /// Token type assigned by this engine.
    type Token: TrackingToken;
    /// Event type produced by this engine.
    type Event: TrackedEvent<Token = Self::Token>;
    /// Lazy event stream. Dropping it closes the stream.
    type Events: Iterator<Item = Result<Self::Event, StorageError>> + Send + 'static;

    /// Opens a stream of events strictly after `after`.
    ///
    /// With `may_block` the stream may block briefly awaiting new commits and
    /// is expected to be long-lived; without it the stream terminates once
    /// currently persisted events are exhausted.
    fn read_events(
        &self,
        after: Option<Self::Token>,
        may_block: bool,
    ) -> Result<Self::Events, StorageError>;
}
