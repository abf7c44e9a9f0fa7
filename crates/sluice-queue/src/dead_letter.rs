//! Append-only dead-letter log.
//!
//! Terminal storage for events whose retry budget is exhausted or
//! whose failure was classified permanent. Entries are never mutated;
//! reprocessing is a manual, external operation surfaced through the
//! inspection endpoint.

use std::{future::Future, pin::Pin};

use sluice_core::{DeadLetterEntry, EventId};
use tokio::sync::Mutex;
use tracing::error;

use crate::error::Result;

/// Sink contract for terminal failure records.
pub trait DeadLetterSink: Send + Sync + 'static {
    /// Appends a terminal record. Creation is monotonic: once an event
    /// is recorded here, no further attempts are scheduled for it.
    fn record(&self, entry: DeadLetterEntry) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// All recorded entries, oldest first.
    fn entries(&self) -> Pin<Box<dyn Future<Output = Result<Vec<DeadLetterEntry>>> + Send + '_>>;

    /// Whether an event has already been dead-lettered.
    fn contains(&self, event_id: &EventId) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}

/// In-memory append-only dead-letter log.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterLog {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl InMemoryDeadLetterLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeadLetterSink for InMemoryDeadLetterLog {
    fn record(&self, entry: DeadLetterEntry) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            error!(
                event_id = %entry.event_id,
                reason = %entry.reason,
                total_attempts = entry.total_attempts,
                "event dead-lettered, manual intervention required"
            );
            self.entries.lock().await.push(entry);
            Ok(())
        })
    }

    fn entries(&self) -> Pin<Box<dyn Future<Output = Result<Vec<DeadLetterEntry>>> + Send + '_>> {
        Box::pin(async move { Ok(self.entries.lock().await.clone()) })
    }

    fn contains(&self, event_id: &EventId) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        let id = event_id.clone();
        Box::pin(async move { self.entries.lock().await.iter().any(|e| e.event_id == id) })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sluice_core::DeadLetterReason;

    use super::*;

    fn entry(id: &str) -> DeadLetterEntry {
        DeadLetterEntry {
            event_id: EventId::from(id),
            source: "test".to_string(),
            event_type: Some("order.created".to_string()),
            payload: bytes::Bytes::from_static(b"{\"id\":\"evt\"}"),
            total_attempts: 5,
            reason: DeadLetterReason::RetriesExhausted,
            last_error: Some("server error: HTTP 503".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn entries_are_appended_in_order() {
        let log = InMemoryDeadLetterLog::new();
        log.record(entry("evt_1")).await.unwrap();
        log.record(entry("evt_2")).await.unwrap();

        let entries = log.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_id, EventId::from("evt_1"));
        assert_eq!(entries[1].event_id, EventId::from("evt_2"));
    }

    #[tokio::test]
    async fn contains_finds_recorded_events() {
        let log = InMemoryDeadLetterLog::new();
        log.record(entry("evt_1")).await.unwrap();

        assert!(log.contains(&EventId::from("evt_1")).await);
        assert!(!log.contains(&EventId::from("evt_2")).await);
    }
}
