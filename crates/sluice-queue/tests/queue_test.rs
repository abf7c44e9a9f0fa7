//! Lease-semantics tests for the in-memory event queue.
//!
//! Covers visibility timing, lease exclusivity, expiry behavior, and
//! attempt counting across ack/nack/expiry paths.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::Utc;
use sluice_core::{Clock, Event, EventId, TestClock};
use sluice_queue::{EventQueue, InMemoryQueue, QueueError};

const LEASE: Duration = Duration::from_secs(30);

fn test_event(id: &str) -> Event {
    Event::new(
        EventId::from(id),
        "test",
        Some("order.created".to_string()),
        Utc::now(),
        Bytes::from_static(b"{\"id\":\"evt\"}"),
        HashMap::new(),
    )
}

fn queue_with_clock() -> (InMemoryQueue, TestClock) {
    let clock = TestClock::new();
    let queue = InMemoryQueue::new(Arc::new(clock.clone()));
    (queue, clock)
}

#[tokio::test]
async fn lease_on_empty_queue_returns_none() {
    let (queue, _clock) = queue_with_clock();
    assert!(queue.lease(0, LEASE).await.unwrap().is_none());
}

#[tokio::test]
async fn enqueued_items_leased_fifo() {
    let (queue, clock) = queue_with_clock();
    queue.enqueue(test_event("evt_1"), clock.now()).await.unwrap();
    queue.enqueue(test_event("evt_2"), clock.now()).await.unwrap();

    let first = queue.lease(0, LEASE).await.unwrap().unwrap();
    let second = queue.lease(0, LEASE).await.unwrap().unwrap();
    assert_eq!(first.item.event.id, EventId::from("evt_1"));
    assert_eq!(second.item.event.id, EventId::from("evt_2"));
}

#[tokio::test]
async fn leased_item_invisible_to_other_workers() {
    let (queue, clock) = queue_with_clock();
    queue.enqueue(test_event("evt_1"), clock.now()).await.unwrap();

    let lease = queue.lease(0, LEASE).await.unwrap();
    assert!(lease.is_some());
    assert!(queue.lease(1, LEASE).await.unwrap().is_none());
}

#[tokio::test]
async fn delayed_item_invisible_until_available() {
    let (queue, clock) = queue_with_clock();
    let available_at = clock.now() + chrono::Duration::seconds(60);
    queue.enqueue(test_event("evt_1"), available_at).await.unwrap();

    assert!(queue.lease(0, LEASE).await.unwrap().is_none());

    clock.advance(Duration::from_secs(61));
    assert!(queue.lease(0, LEASE).await.unwrap().is_some());
}

#[tokio::test]
async fn ack_removes_item_permanently() {
    let (queue, clock) = queue_with_clock();
    queue.enqueue(test_event("evt_1"), clock.now()).await.unwrap();

    let lease = queue.lease(0, LEASE).await.unwrap().unwrap();
    queue.ack(lease.token).await.unwrap();

    assert_eq!(queue.depth().await, 0);
    clock.advance(Duration::from_secs(3600));
    assert!(queue.lease(0, LEASE).await.unwrap().is_none());
}

#[tokio::test]
async fn nack_increments_attempts_and_delays_visibility() {
    let (queue, clock) = queue_with_clock();
    queue.enqueue(test_event("evt_1"), clock.now()).await.unwrap();

    let lease = queue.lease(0, LEASE).await.unwrap().unwrap();
    assert_eq!(lease.item.attempts, 0);
    assert_eq!(lease.item.next_attempt_number(), 1);

    queue.nack(lease.token, Duration::from_secs(10)).await.unwrap();

    // Not visible before the requeue delay elapses.
    assert!(queue.lease(0, LEASE).await.unwrap().is_none());

    clock.advance(Duration::from_secs(11));
    let release = queue.lease(0, LEASE).await.unwrap().unwrap();
    assert_eq!(release.item.attempts, 1);
    assert_eq!(release.item.next_attempt_number(), 2);
}

#[tokio::test]
async fn expired_lease_returns_item_with_attempts_unchanged() {
    let (queue, clock) = queue_with_clock();
    queue.enqueue(test_event("evt_1"), clock.now()).await.unwrap();

    let lease = queue.lease(0, Duration::from_secs(5)).await.unwrap().unwrap();
    assert_eq!(lease.item.attempts, 0);

    // Worker vanishes without ack/nack; lease expires.
    clock.advance(Duration::from_secs(6));

    let release = queue.lease(1, LEASE).await.unwrap().unwrap();
    assert_eq!(release.item.event.id, EventId::from("evt_1"));
    assert_eq!(release.item.attempts, 0, "expiry must not count as a failed attempt");
}

#[tokio::test]
async fn stale_token_after_expiry_is_rejected() {
    let (queue, clock) = queue_with_clock();
    queue.enqueue(test_event("evt_1"), clock.now()).await.unwrap();

    let lease = queue.lease(0, Duration::from_secs(5)).await.unwrap().unwrap();
    clock.advance(Duration::from_secs(6));

    // Another worker reclaims the item, invalidating the first token.
    let _release = queue.lease(1, LEASE).await.unwrap().unwrap();

    let err = queue.ack(lease.token).await.unwrap_err();
    assert!(matches!(err, QueueError::UnknownLease(_)));
    let err = queue.nack(lease.token, Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, QueueError::UnknownLease(_)));
}

#[tokio::test]
async fn absurd_durations_clamped_without_panic() {
    let (queue, clock) = queue_with_clock();
    queue.enqueue(test_event("evt_1"), clock.now()).await.unwrap();

    // A lease duration beyond the chrono range must not overflow the
    // deadline computation.
    let lease = queue.lease(0, Duration::from_secs(u64::MAX)).await.unwrap().unwrap();
    queue.nack(lease.token, Duration::from_secs(u64::MAX)).await.unwrap();

    // Clamped far into the future, so still invisible now.
    assert!(queue.lease(0, LEASE).await.unwrap().is_none());
    assert_eq!(queue.depth().await, 1);
}

#[tokio::test]
async fn every_enqueued_item_eventually_visible() {
    let (queue, clock) = queue_with_clock();
    for i in 0..20 {
        let delay = chrono::Duration::seconds(i % 5);
        queue.enqueue(test_event(&format!("evt_{i}")), clock.now() + delay).await.unwrap();
    }

    clock.advance(Duration::from_secs(5));

    let mut seen = Vec::new();
    while let Some(lease) = queue.lease(0, LEASE).await.unwrap() {
        seen.push(lease.item.event.id.clone());
        queue.ack(lease.token).await.unwrap();
    }
    assert_eq!(seen.len(), 20);
}

#[tokio::test]
async fn concurrent_workers_never_share_a_lease() {
    let clock = TestClock::new();
    let queue = Arc::new(InMemoryQueue::new(Arc::new(clock.clone())));

    for i in 0..50 {
        queue.enqueue(test_event(&format!("evt_{i}")), clock.now()).await.unwrap();
    }

    let mut handles = Vec::new();
    for worker_id in 0..8 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(lease) = queue.lease(worker_id, LEASE).await.unwrap() {
                claimed.push(lease.item.event.id.clone());
                queue.ack(lease.token).await.unwrap();
            }
            claimed
        }));
    }

    let mut all: Vec<EventId> = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    all.sort_by(|a, b| a.0.cmp(&b.0));
    all.dedup();
    assert_eq!(all.len(), 50, "each item must be leased exactly once");
}
