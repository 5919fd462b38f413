//! TailStore - Embedded Event Store Facade
//!
//! Multiplexes any number of live event-stream subscribers over a single
//! backing storage engine. One background producer tails the engine into a
//! bounded, singly linked in-memory cache; subscribers walk that chain
//! lock-free, blocking on a shared condition at the tip. A subscriber whose
//! position is not covered by the cache catches up against storage through a
//! private stream and rejoins the tail once it is close enough.
//!
//! # Key Features
//!
//! - Single shared producer: storage is polled once, no matter how many
//!   subscribers tail the stream
//! - Bounded memory: a sliding window of the most recent events; laggards
//!   are detached and recover through private catch-up reads
//! - Lock-free tail walks: forward links are published once with
//!   release/acquire semantics
//! - Blocking `peek`/`next` semantics with timeouts, driven by commit
//!   notifications instead of per-subscriber polling
//!
//! # Example
//!
//! ```
//! use tailstore::TailStore;
//! use tailstore_mem::MemoryStorageEngine;
//!
//! let storage = MemoryStorageEngine::new();
//! let store = TailStore::new(storage.clone());
//!
//! // Subscribe from the very beginning
//! let mut stream = store.open_stream(None)?;
//!
//! // Events are appended to the engine, then the store is notified
//! storage.append("hello".to_string());
//! store.after_commit();
//!
//! while let Some(event) = stream.peek()? {
//!     println!("saw {:?}", event);
//!     stream.next_available()?;
//! }
//! # Ok::<(), tailstore::StreamError>(())
//! ```

mod chain;
mod cleaner;
mod config;
mod consumer;
mod error;
mod invariants;
mod metrics;
mod producer;
mod storage;
mod store;
mod sync;

pub use config::StoreConfig;
pub use consumer::EventStream;
pub use error::{StorageError, StreamError};
pub use metrics::MetricsSnapshot;
pub use storage::{StorageEngine, TrackedEvent, TrackingToken};
pub use store::TailStore;
