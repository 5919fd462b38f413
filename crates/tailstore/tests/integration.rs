//! End-to-end scenarios: real threads, one in-memory engine per test.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tailstore::{StoreConfig, TailStore};
use tailstore_mem::{MemoryStorageEngine, SequenceToken};

fn quick_store(
    storage: &MemoryStorageEngine,
    cached_events: usize,
    cleanup: Duration,
) -> TailStore<MemoryStorageEngine> {
    let config = StoreConfig::default()
        .with_cached_events(cached_events)
        .with_fetch_delay(Duration::from_millis(20))
        .with_cleanup_delay(cleanup)
        .with_metrics(true);
    TailStore::with_config(storage.clone(), config)
}

/// Polls `condition` until it holds or the timeout elapses.
fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn test_caught_up_subscriber_tails_new_commits() {
    let storage = MemoryStorageEngine::new();
    let store = quick_store(&storage, 4, Duration::from_secs(60));

    let mut subscriber = store.open_stream(None).unwrap();
    // Nothing persisted yet: the empty catch-up stream ends immediately and
    // the subscriber joins the tail
    assert!(!subscriber.has_next_available(Duration::ZERO).unwrap());
    assert!(subscriber.is_tailing());

    for n in 1..=3 {
        storage.append(format!("event-{n}"));
    }
    store.after_commit();

    for expected in 1..=3 {
        let event = subscriber.next_available().unwrap();
        assert_eq!(event.token(), SequenceToken(expected));
    }
}

#[test]
fn test_late_subscriber_catches_up_and_rejoins() {
    let storage = MemoryStorageEngine::new();
    let store = quick_store(&storage, 5, Duration::from_secs(60));

    for n in 1..=20 {
        storage.append(format!("event-{n}"));
    }
    store.after_commit();

    // Far behind the window: starts on a private catch-up stream
    let mut subscriber = store.open_stream(None).unwrap();
    for expected in 1..=20 {
        let event = subscriber.next_available().unwrap();
        assert_eq!(event.token(), SequenceToken(expected));
    }

    // Exhausting the catch-up stream moves the subscriber onto the tail
    let _ = subscriber.has_next_available(Duration::ZERO).unwrap();
    assert!(subscriber.is_tailing());

    storage.append("event-21".to_string());
    store.after_commit();
    assert_eq!(
        subscriber.next_available().unwrap().token(),
        SequenceToken(21)
    );
}

#[test]
fn test_subscriber_starting_mid_stream_gets_the_suffix() {
    let storage = MemoryStorageEngine::new();
    let store = quick_store(&storage, 10, Duration::from_secs(60));
    for n in 1..=5 {
        storage.append(format!("event-{n}"));
    }

    let mut subscriber = store.open_stream(Some(SequenceToken(3))).unwrap();
    assert_eq!(subscriber.next_available().unwrap().token(), SequenceToken(4));
    assert_eq!(subscriber.next_available().unwrap().token(), SequenceToken(5));
    assert!(!subscriber.has_next_available(Duration::from_millis(50)).unwrap());
}

#[test]
fn test_laggard_is_detached_and_recovers() {
    let storage = MemoryStorageEngine::new();
    let store = quick_store(&storage, 5, Duration::from_millis(150));

    let mut subscriber = store.open_stream(None).unwrap();
    assert!(!subscriber.has_next_available(Duration::ZERO).unwrap());

    for n in 1..=3 {
        storage.append(format!("event-{n}"));
    }
    store.after_commit();
    assert_eq!(subscriber.next_available().unwrap().token(), SequenceToken(1));
    assert_eq!(subscriber.next_available().unwrap().token(), SequenceToken(2));

    // The window slides past the subscriber's position
    for n in 4..=10 {
        storage.append(format!("event-{n}"));
    }
    store.after_commit();
    assert!(wait_until(Duration::from_secs(5), || {
        store.cached_window().map(|(oldest, _)| oldest) == Some(SequenceToken(6))
    }));

    // The cleaner notices and breaks the subscriber's grip on the tail
    assert!(wait_until(Duration::from_secs(5), || !subscriber.is_tailing()));
    assert!(store.metrics().laggards_detached >= 1);

    // Recovery: a private stream replays 3..=10, then the tail resumes
    for expected in 3..=10 {
        let event = subscriber.next_available().unwrap();
        assert_eq!(event.token(), SequenceToken(expected));
    }
    storage.append("event-11".to_string());
    store.after_commit();
    assert_eq!(
        subscriber.next_available().unwrap().token(),
        SequenceToken(11)
    );
}

#[test]
fn test_commit_notification_wakes_blocked_subscriber() {
    let storage = MemoryStorageEngine::new();
    // Fetch delay far beyond the test duration: only the wake-up edge can
    // deliver in time
    let config = StoreConfig::default()
        .with_fetch_delay(Duration::from_secs(10))
        .with_cleanup_delay(Duration::from_secs(60));
    let store = Arc::new(TailStore::with_config(storage.clone(), config));

    let mut subscriber = store.open_stream(None).unwrap();
    assert!(!subscriber.has_next_available(Duration::ZERO).unwrap());

    let waiter = thread::spawn(move || {
        let started = Instant::now();
        let available = subscriber.has_next_available(Duration::from_secs(60)).unwrap();
        (subscriber, available, started.elapsed())
    });

    thread::sleep(Duration::from_millis(100));
    storage.append("event-1".to_string());
    store.after_commit();

    let (mut subscriber, available, elapsed) = waiter.join().unwrap();
    assert!(available);
    assert!(
        elapsed < Duration::from_secs(5),
        "wake-up took {elapsed:?}, expected well under the fetch delay"
    );
    assert_eq!(subscriber.next_available().unwrap().token(), SequenceToken(1));
}

#[test]
fn test_trim_under_concurrent_tailing() {
    const EVENTS: u64 = 1000;
    const WINDOW: usize = 2;

    let storage = MemoryStorageEngine::new();
    let store = Arc::new(quick_store(&storage, WINDOW, Duration::from_millis(10)));

    let mut subscribers = Vec::new();
    for _ in 0..2 {
        let store = Arc::clone(&store);
        subscribers.push(thread::spawn(move || {
            let mut stream = store.open_stream(None).unwrap();
            for expected in 1..=EVENTS {
                let event = stream.next_available().unwrap();
                assert_eq!(event.token(), SequenceToken(expected));
            }
        }));
    }

    // Sample the window while the run is in flight; trimming may lag an
    // in-progress append by one node
    let done = Arc::new(AtomicBool::new(false));
    let sampler = {
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                assert!(store.cached_len() <= WINDOW + 1);
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    for n in 1..=EVENTS {
        storage.append(format!("event-{n}"));
        store.after_commit();
    }

    for subscriber in subscribers {
        subscriber.join().unwrap();
    }
    done.store(true, Ordering::Release);
    sampler.join().unwrap();

    // The trim of the final append may still be in flight
    assert!(wait_until(Duration::from_secs(5), || {
        store.cached_len() <= WINDOW
    }));
}

#[test]
fn test_producer_survives_storage_failures() {
    const EVENTS: u64 = 50;

    let storage = MemoryStorageEngine::new();
    let config = StoreConfig::default()
        .with_fetch_delay(Duration::from_millis(15))
        .with_metrics(true);
    let store = TailStore::with_config(storage.clone(), config);

    let mut subscriber = store.open_stream(None).unwrap();
    assert!(!subscriber.has_next_available(Duration::ZERO).unwrap());

    // From here on, every other storage read fails
    storage.fail_alternate_reads(true);

    for n in 1..=EVENTS {
        storage.append(format!("event-{n}"));
        store.after_commit();
    }
    for expected in 1..=EVENTS {
        let event = subscriber.next_available().unwrap();
        assert_eq!(event.token(), SequenceToken(expected));
    }
    assert!(store.metrics().storage_errors >= 1);

    // The producer is still alive after all those failed fetches
    storage.append("one-more".to_string());
    store.after_commit();
    assert_eq!(
        subscriber.next_available().unwrap().token(),
        SequenceToken(EVENTS + 1)
    );
}

#[test]
fn test_fan_out_delivers_everything_to_every_subscriber() {
    const SUBSCRIBERS: usize = 4;
    const EVENTS: u64 = 100;

    let storage = MemoryStorageEngine::new();
    let store = Arc::new(quick_store(&storage, 1000, Duration::from_secs(60)));

    let mut handles = Vec::new();
    for _ in 0..SUBSCRIBERS {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            let mut stream = store.open_stream(None).unwrap();
            let mut received = Vec::new();
            for _ in 0..EVENTS {
                received.push(stream.next_available().unwrap().token().0);
            }
            received
        }));
    }

    // Jittered commit pacing shakes out producer/subscriber interleavings
    use rand::Rng;
    let mut rng = rand::thread_rng();
    for n in 1..=EVENTS {
        storage.append(format!("event-{n}"));
        store.after_commit();
        if rng.gen_bool(0.2) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    let expected: Vec<u64> = (1..=EVENTS).collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn test_store_close_unblocks_waiting_subscribers() {
    let storage = MemoryStorageEngine::new();
    let store = Arc::new(quick_store(&storage, 100, Duration::from_secs(60)));

    let mut subscriber = store.open_stream(None).unwrap();
    assert!(!subscriber.has_next_available(Duration::ZERO).unwrap());

    let waiter = thread::spawn(move || subscriber.next_available());

    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    store.close();

    let result = waiter.join().unwrap();
    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
}
