//! Demo: one committer feeding two live subscribers through a shared
//! tailing cache.
//!
//! Run with: `cargo run --bin tailstore-demo`

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tailstore::{StoreConfig, TailStore};
use tailstore_mem::MemoryStorageEngine;

const EVENTS: u64 = 200;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let storage = MemoryStorageEngine::new();
    let config = StoreConfig::default()
        .with_cached_events(32)
        .with_fetch_delay(Duration::from_millis(50))
        .with_cleanup_delay(Duration::from_millis(500))
        .with_metrics(true);
    let store = Arc::new(TailStore::with_config(storage.clone(), config));

    // Two subscribers tail from the very beginning
    let mut subscribers = Vec::new();
    for subscriber_id in 0..2 {
        let store = Arc::clone(&store);
        subscribers.push(thread::spawn(move || {
            let mut stream = store.open_stream(None).expect("store just opened");
            for expected in 1..=EVENTS {
                let event = stream.next_available().expect("store stays open");
                assert_eq!(event.token().0, expected);
                if expected % 50 == 0 {
                    println!("subscriber {subscriber_id}: reached token {expected}");
                }
            }
        }));
    }

    // Committer: append to storage, then notify the store
    for n in 1..=EVENTS {
        storage.append(format!("event-{n}"));
        store.after_commit();
        if n % 20 == 0 {
            thread::sleep(Duration::from_millis(5));
        }
    }

    for subscriber in subscribers {
        subscriber.join().expect("subscriber panicked");
    }

    let metrics = store.metrics();
    println!(
        "done: cached={} trimmed={} laggards={} wakeups={} window={:?}",
        metrics.events_cached,
        metrics.events_trimmed,
        metrics.laggards_detached,
        metrics.producer_wakeups,
        store.cached_window(),
    );
    store.close();
}
