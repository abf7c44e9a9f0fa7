//! Idempotency store with atomic check-and-set admission.
//!
//! Records which event identifiers have already been accepted so the
//! HTTP boundary can reject duplicates before they ever reach the
//! queue. Concurrent `admit` calls for the same identifier yield
//! exactly one `Accepted`; everyone else sees `Duplicate`.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sluice_core::{Clock, EventId};
use tokio::sync::Mutex;

use crate::error::Result;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First time this identifier was seen; caller owns processing.
    Accepted,
    /// Identifier already admitted within the retention window.
    Duplicate,
}

/// Atomic check-and-set contract for duplicate detection.
///
/// The durability of the backing medium determines the processing
/// guarantee of the whole system: a volatile store degrades
/// exactly-once to at-least-once across restarts, with a duplicate
/// window equal to the retention period.
pub trait IdempotencyStore: Send + Sync + 'static {
    /// Admits an event identifier, returning `Accepted` exactly once
    /// per identifier per retention window.
    fn admit(&self, event_id: &EventId) -> Pin<Box<dyn Future<Output = Result<Admission>> + Send + '_>>;

    /// Explicitly releases an identifier, allowing it to be admitted
    /// again. Intended for external remediation after terminal
    /// processing, not for the normal pipeline path.
    fn release(&self, event_id: &EventId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Number of identifiers currently held.
    fn len(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>>;
}

/// In-memory idempotency store with time-based retention.
///
/// All mutation happens under a single mutex, which provides the
/// atomic check-and-set. Expired entries are purged lazily on each
/// `admit`.
#[derive(Debug)]
pub struct InMemoryIdempotencyStore {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryIdempotencyStore {
    /// Creates a store that remembers identifiers for `retention`.
    pub fn new(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { entries: Mutex::new(HashMap::new()), retention, clock }
    }

    /// Drops entries older than the retention window.
    ///
    /// Runs lazily on every `admit`; exposed for explicit maintenance
    /// sweeps.
    pub async fn purge_expired(&self) {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Self::purge(&mut entries, self.retention, now);
    }

    fn purge(entries: &mut HashMap<String, DateTime<Utc>>, retention: Duration, now: DateTime<Utc>) {
        let retention =
            chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::MAX);
        entries.retain(|_, admitted_at| now - *admitted_at < retention);
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn admit(&self, event_id: &EventId) -> Pin<Box<dyn Future<Output = Result<Admission>> + Send + '_>> {
        let key = event_id.0.clone();
        Box::pin(async move {
            let now = self.clock.now();
            let mut entries = self.entries.lock().await;
            Self::purge(&mut entries, self.retention, now);

            if entries.contains_key(&key) {
                return Ok(Admission::Duplicate);
            }
            entries.insert(key, now);
            Ok(Admission::Accepted)
        })
    }

    fn release(&self, event_id: &EventId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = event_id.0.clone();
        Box::pin(async move {
            self.entries.lock().await.remove(&key);
            Ok(())
        })
    }

    fn len(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(async move { self.entries.lock().await.len() })
    }
}

#[cfg(test)]
mod tests {
    use sluice_core::TestClock;

    use super::*;

    fn store_with_clock(retention_secs: u64) -> (InMemoryIdempotencyStore, TestClock) {
        let clock = TestClock::new();
        let store =
            InMemoryIdempotencyStore::new(Duration::from_secs(retention_secs), Arc::new(clock.clone()));
        (store, clock)
    }

    #[tokio::test]
    async fn first_admit_accepted_second_duplicate() {
        let (store, _clock) = store_with_clock(3600);
        let id = EventId::from("evt_1");

        assert_eq!(store.admit(&id).await.unwrap(), Admission::Accepted);
        assert_eq!(store.admit(&id).await.unwrap(), Admission::Duplicate);
    }

    #[tokio::test]
    async fn distinct_ids_admitted_independently() {
        let (store, _clock) = store_with_clock(3600);

        assert_eq!(store.admit(&EventId::from("a")).await.unwrap(), Admission::Accepted);
        assert_eq!(store.admit(&EventId::from("b")).await.unwrap(), Admission::Accepted);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn retention_window_expires_entries() {
        let (store, clock) = store_with_clock(60);
        let id = EventId::from("evt_1");

        assert_eq!(store.admit(&id).await.unwrap(), Admission::Accepted);
        clock.advance(Duration::from_secs(61));
        assert_eq!(store.admit(&id).await.unwrap(), Admission::Accepted);
    }

    #[tokio::test]
    async fn release_allows_readmission() {
        let (store, _clock) = store_with_clock(3600);
        let id = EventId::from("evt_1");

        assert_eq!(store.admit(&id).await.unwrap(), Admission::Accepted);
        store.release(&id).await.unwrap();
        assert_eq!(store.admit(&id).await.unwrap(), Admission::Accepted);
    }
}
