//! Error types for store and stream operations.

use thiserror::Error;

/// Errors surfaced by a storage engine.
///
/// The core only ever reads; appending and publishing stay behind the
/// engine's own API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Reading from the engine failed.
    #[error("storage read failed: {0}")]
    Read(String),

    /// The engine has been closed.
    #[error("storage engine is closed")]
    Closed,
}

/// Errors surfaced by event stream subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// A private catch-up read against storage failed. The subscriber stays
    /// usable; retrying reopens the catch-up stream from the last delivered
    /// position.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The store (or this stream) has been closed.
    #[error("event store is closed")]
    Closed,
}

impl StreamError {
    /// Returns `true` if retrying the operation can succeed.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns `true` if this error indicates the stream is permanently
    /// unusable.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
