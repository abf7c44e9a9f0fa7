//! Event store: accepted events, their status, and attempt history.
//!
//! Backs the inspection endpoints and the dispatcher's attempt audit
//! trail. The event itself is immutable after insertion; only status
//! transitions and appended attempts change over time.

use std::{collections::HashMap, future::Future, pin::Pin};

use chrono::{DateTime, Utc};
use sluice_core::{DeliveryAttempt, Event, EventId, EventStatus};
use tokio::sync::RwLock;

use crate::error::{QueueError, Result};

/// Filter for event enumeration. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Match only events in this lifecycle status.
    pub status: Option<EventStatus>,
    /// Match only events with this routing type.
    pub event_type: Option<String>,
    /// Match only events received at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Match only events received at or before this instant.
    pub to: Option<DateTime<Utc>>,
}

impl EventFilter {
    fn matches(&self, event: &Event, status: EventStatus) -> bool {
        if self.status.is_some_and(|s| s != status) {
            return false;
        }
        if self.event_type.as_deref().is_some_and(|t| event.routing_key() != t) {
            return false;
        }
        if self.from.is_some_and(|from| event.received_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| event.received_at > to) {
            return false;
        }
        true
    }
}

/// One row of an event enumeration: the event with its current
/// lifecycle state.
#[derive(Debug, Clone)]
pub struct EventSummary {
    /// The matched event.
    pub event: Event,
    /// Current lifecycle status.
    pub status: EventStatus,
    /// Delivery attempts recorded so far.
    pub attempt_count: u32,
}

/// Repository contract for accepted events and their delivery history.
pub trait EventStore: Send + Sync + 'static {
    /// Inserts a newly accepted event with status `Received`.
    fn insert(&self, event: Event) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Transitions an event's status.
    fn set_status(
        &self,
        event_id: &EventId,
        status: EventStatus,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Appends a delivery attempt record.
    fn record_attempt(
        &self,
        attempt: DeliveryAttempt,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Looks up an event by id.
    fn find_event(
        &self,
        event_id: &EventId,
    ) -> Pin<Box<dyn Future<Output = Option<Event>> + Send + '_>>;

    /// Current status of an event.
    fn find_status(
        &self,
        event_id: &EventId,
    ) -> Pin<Box<dyn Future<Output = Option<EventStatus>> + Send + '_>>;

    /// Attempt history for an event, in attempt-number order.
    fn find_attempts(
        &self,
        event_id: &EventId,
    ) -> Pin<Box<dyn Future<Output = Vec<DeliveryAttempt>> + Send + '_>>;

    /// All events matching `filter`, newest first by receive time.
    fn find_events(
        &self,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Vec<EventSummary>> + Send + '_>>;
}

#[derive(Debug)]
struct StoredEvent {
    event: Event,
    status: EventStatus,
    attempts: Vec<DeliveryAttempt>,
}

/// In-memory event store.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<HashMap<String, StoredEvent>>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for InMemoryEventStore {
    fn insert(&self, event: Event) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut events = self.events.write().await;
            let key = event.id.0.clone();
            if events.contains_key(&key) {
                return Err(QueueError::DuplicateEvent(key));
            }
            events.insert(
                key,
                StoredEvent { event, status: EventStatus::Received, attempts: Vec::new() },
            );
            Ok(())
        })
    }

    fn set_status(
        &self,
        event_id: &EventId,
        status: EventStatus,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = event_id.0.clone();
        Box::pin(async move {
            let mut events = self.events.write().await;
            let stored = events.get_mut(&key).ok_or(QueueError::NotFound(key.clone()))?;
            stored.status = status;
            Ok(())
        })
    }

    fn record_attempt(
        &self,
        attempt: DeliveryAttempt,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut events = self.events.write().await;
            let key = attempt.event_id.0.clone();
            let stored = events.get_mut(&key).ok_or(QueueError::NotFound(key.clone()))?;
            stored.attempts.push(attempt);
            Ok(())
        })
    }

    fn find_event(
        &self,
        event_id: &EventId,
    ) -> Pin<Box<dyn Future<Output = Option<Event>> + Send + '_>> {
        let key = event_id.0.clone();
        Box::pin(async move { self.events.read().await.get(&key).map(|s| s.event.clone()) })
    }

    fn find_status(
        &self,
        event_id: &EventId,
    ) -> Pin<Box<dyn Future<Output = Option<EventStatus>> + Send + '_>> {
        let key = event_id.0.clone();
        Box::pin(async move { self.events.read().await.get(&key).map(|s| s.status) })
    }

    fn find_attempts(
        &self,
        event_id: &EventId,
    ) -> Pin<Box<dyn Future<Output = Vec<DeliveryAttempt>> + Send + '_>> {
        let key = event_id.0.clone();
        Box::pin(async move {
            self.events
                .read()
                .await
                .get(&key)
                .map(|s| s.attempts.clone())
                .unwrap_or_default()
        })
    }

    fn find_events(
        &self,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Vec<EventSummary>> + Send + '_>> {
        Box::pin(async move {
            let events = self.events.read().await;
            let mut matches: Vec<EventSummary> = events
                .values()
                .filter(|stored| filter.matches(&stored.event, stored.status))
                .map(|stored| EventSummary {
                    event: stored.event.clone(),
                    status: stored.status,
                    attempt_count: stored.attempts.len() as u32,
                })
                .collect();
            matches.sort_by(|a, b| b.event.received_at.cmp(&a.event.received_at));
            matches
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::Utc;

    use super::*;

    fn event(id: &str) -> Event {
        Event::new(
            EventId::from(id),
            "test",
            Some("order.created".to_string()),
            Utc::now(),
            Bytes::from_static(b"{}"),
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn insert_then_lookup() {
        let store = InMemoryEventStore::new();
        store.insert(event("evt_1")).await.unwrap();

        assert!(store.find_event(&EventId::from("evt_1")).await.is_some());
        assert_eq!(
            store.find_status(&EventId::from("evt_1")).await,
            Some(EventStatus::Received)
        );
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let store = InMemoryEventStore::new();
        store.insert(event("evt_1")).await.unwrap();

        let err = store.insert(event("evt_1")).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateEvent(_)));
    }

    #[tokio::test]
    async fn status_transitions_recorded() {
        let store = InMemoryEventStore::new();
        store.insert(event("evt_1")).await.unwrap();
        store.set_status(&EventId::from("evt_1"), EventStatus::Delivered).await.unwrap();

        assert_eq!(
            store.find_status(&EventId::from("evt_1")).await,
            Some(EventStatus::Delivered)
        );
    }

    #[tokio::test]
    async fn attempts_appended_in_order() {
        let store = InMemoryEventStore::new();
        store.insert(event("evt_1")).await.unwrap();

        for n in 1..=3 {
            store
                .record_attempt(DeliveryAttempt::failure(
                    EventId::from("evt_1"),
                    n,
                    Utc::now(),
                    Some(503),
                    "server error",
                    10,
                ))
                .await
                .unwrap();
        }

        let attempts = store.find_attempts(&EventId::from("evt_1")).await;
        let numbers: Vec<u32> = attempts.iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn find_events_filters_by_status_and_type() {
        let store = InMemoryEventStore::new();
        store.insert(event("evt_1")).await.unwrap();
        store.insert(event("evt_2")).await.unwrap();

        let mut refund = event("evt_3");
        refund.event_type = Some("refund.created".to_string());
        store.insert(refund).await.unwrap();

        store.set_status(&EventId::from("evt_2"), EventStatus::Delivered).await.unwrap();

        let all = store.find_events(EventFilter::default()).await;
        assert_eq!(all.len(), 3);

        let received = store
            .find_events(EventFilter { status: Some(EventStatus::Received), ..Default::default() })
            .await;
        assert_eq!(received.len(), 2);

        let refunds = store
            .find_events(EventFilter {
                event_type: Some("refund.created".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].event.id, EventId::from("evt_3"));

        let none = store
            .find_events(EventFilter {
                status: Some(EventStatus::Delivered),
                event_type: Some("refund.created".to_string()),
                ..Default::default()
            })
            .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn find_events_newest_first_within_time_range() {
        let store = InMemoryEventStore::new();
        let base = Utc::now();
        for (i, id) in ["evt_1", "evt_2", "evt_3"].iter().enumerate() {
            let mut e = event(id);
            e.received_at = base + chrono::Duration::seconds(i as i64 * 60);
            store.insert(e).await.unwrap();
        }

        let all = store.find_events(EventFilter::default()).await;
        let ids: Vec<&str> = all.iter().map(|s| s.event.id.0.as_str()).collect();
        assert_eq!(ids, vec!["evt_3", "evt_2", "evt_1"]);

        let windowed = store
            .find_events(EventFilter {
                from: Some(base + chrono::Duration::seconds(30)),
                to: Some(base + chrono::Duration::seconds(90)),
                ..Default::default()
            })
            .await;
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].event.id, EventId::from("evt_2"));
    }

    #[tokio::test]
    async fn attempt_for_unknown_event_rejected() {
        let store = InMemoryEventStore::new();
        let err = store
            .record_attempt(DeliveryAttempt::success(
                EventId::from("ghost"),
                1,
                Utc::now(),
                Some(200),
                5,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }
}
