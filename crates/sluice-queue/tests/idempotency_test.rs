//! Concurrency property for the idempotency store.

use std::{sync::Arc, time::Duration};

use sluice_core::{EventId, TestClock};
use sluice_queue::{Admission, IdempotencyStore, InMemoryIdempotencyStore};

#[tokio::test]
async fn concurrent_admits_accept_exactly_one() {
    let clock = TestClock::new();
    let store = Arc::new(InMemoryIdempotencyStore::new(
        Duration::from_secs(3600),
        Arc::new(clock),
    ));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.admit(&EventId::from("evt_contested")).await.unwrap()
        }));
    }

    let mut accepted = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Admission::Accepted => accepted += 1,
            Admission::Duplicate => duplicates += 1,
        }
    }

    assert_eq!(accepted, 1, "exactly one concurrent admit wins");
    assert_eq!(duplicates, 31);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn concurrent_admits_for_distinct_ids_all_accepted() {
    let clock = TestClock::new();
    let store = Arc::new(InMemoryIdempotencyStore::new(
        Duration::from_secs(3600),
        Arc::new(clock),
    ));

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.admit(&EventId::from(format!("evt_{i}").as_str())).await.unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Admission::Accepted);
    }
    assert_eq!(store.len().await, 16);
}
