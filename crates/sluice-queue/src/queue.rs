//! Durable-ordered event queue with time-bounded leases.
//!
//! Decouples fast HTTP acceptance from slower downstream processing.
//! Items become visible at their `available_at` time and are handed to
//! workers under exclusive, time-bounded leases. An expired lease
//! silently returns the item to the visible pool with its attempt
//! count unchanged; only an explicit nack counts as a failed attempt.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sluice_core::{Clock, Event};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{QueueError, Result};

/// Converts a std duration to chrono, clamping absurd values so the
/// later `DateTime` addition cannot overflow.
fn clamp_delay(duration: Duration) -> chrono::Duration {
    const MAX_DELAY_DAYS: i64 = 365;
    chrono::Duration::from_std(duration)
        .unwrap_or_else(|_| chrono::Duration::days(MAX_DELAY_DAYS))
        .min(chrono::Duration::days(MAX_DELAY_DAYS))
}

/// Opaque token identifying an outstanding lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseToken(pub Uuid);

impl LeaseToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event wrapped with its delivery bookkeeping.
///
/// `attempts` counts completed (nacked) attempts; the attempt number
/// for the processing that follows a lease is `attempts + 1`.
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// The wrapped event.
    pub event: Event,
    /// Completed failed attempts so far.
    pub attempts: u32,
}

impl QueueItem {
    /// Attempt number for the next processing of this item (1-based).
    pub fn next_attempt_number(&self) -> u32 {
        self.attempts + 1
    }
}

/// A leased item: exclusive claim until ack, nack, or deadline expiry.
#[derive(Debug, Clone)]
pub struct Lease {
    /// Token to present on ack/nack.
    pub token: LeaseToken,
    /// The claimed item.
    pub item: QueueItem,
    /// When the lease expires and the item becomes visible again.
    pub deadline: DateTime<Utc>,
}

/// Queue contract: eventual visibility of every enqueued item, FIFO
/// best effort among visible items, at most one outstanding lease per
/// item.
pub trait EventQueue: Send + Sync + 'static {
    /// Enqueues an event, visible from `available_at` onward.
    fn enqueue(
        &self,
        event: Event,
        available_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Claims the oldest visible item, or `None` when nothing is
    /// available. Never blocks; callers poll or wait with their own
    /// timeout.
    fn lease(
        &self,
        worker_id: usize,
        lease_duration: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Lease>>> + Send + '_>>;

    /// Acknowledges successful terminal processing, removing the item.
    fn ack(&self, token: LeaseToken) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns the item to the queue as a failed attempt, visible
    /// again after `requeue_after`.
    fn nack(
        &self,
        token: LeaseToken,
        requeue_after: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Items currently pending (visible, delayed, or leased).
    fn depth(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>>;
}

#[derive(Debug)]
struct ReadyItem {
    seq: u64,
    available_at: DateTime<Utc>,
    item: QueueItem,
}

#[derive(Debug)]
struct LeasedItem {
    seq: u64,
    deadline: DateTime<Utc>,
    worker_id: usize,
    item: QueueItem,
}

#[derive(Debug, Default)]
struct QueueState {
    next_seq: u64,
    ready: Vec<ReadyItem>,
    leased: HashMap<Uuid, LeasedItem>,
}

/// In-memory queue implementation.
///
/// A single mutex guards all state; expired leases are reclaimed
/// lazily at the start of each `lease` call. Ordering among visible
/// items is by enqueue sequence, which gives FIFO for items with no
/// explicit delay while tolerating reordering under concurrency.
#[derive(Debug)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueue {
    /// Creates an empty queue.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { state: Mutex::new(QueueState::default()), clock }
    }

    /// Moves expired leases back to the visible pool.
    ///
    /// Attempt counts are left unchanged: expiry is not a failed
    /// attempt unless the worker explicitly nacks.
    fn reclaim_expired(state: &mut QueueState, now: DateTime<Utc>) {
        let expired: Vec<Uuid> = state
            .leased
            .iter()
            .filter(|(_, leased)| leased.deadline <= now)
            .map(|(token, _)| *token)
            .collect();

        for token in expired {
            if let Some(leased) = state.leased.remove(&token) {
                debug!(
                    event_id = %leased.item.event.id,
                    worker_id = leased.worker_id,
                    "lease expired, item visible again"
                );
                state.ready.push(ReadyItem {
                    seq: leased.seq,
                    available_at: now,
                    item: leased.item,
                });
            }
        }
    }
}

impl EventQueue for InMemoryQueue {
    fn enqueue(
        &self,
        event: Event,
        available_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.ready.push(ReadyItem {
                seq,
                available_at,
                item: QueueItem { event, attempts: 0 },
            });
            Ok(())
        })
    }

    fn lease(
        &self,
        worker_id: usize,
        lease_duration: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Lease>>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.state.lock().await;
            Self::reclaim_expired(&mut state, now);

            let candidate = state
                .ready
                .iter()
                .enumerate()
                .filter(|(_, r)| r.available_at <= now)
                .min_by_key(|(_, r)| r.seq)
                .map(|(index, _)| index);

            let Some(index) = candidate else {
                return Ok(None);
            };

            let ready = state.ready.swap_remove(index);
            let token = LeaseToken::new();
            let deadline = now + clamp_delay(lease_duration);

            state.leased.insert(
                token.0,
                LeasedItem {
                    seq: ready.seq,
                    deadline,
                    worker_id,
                    item: ready.item.clone(),
                },
            );

            Ok(Some(Lease { token, item: ready.item, deadline }))
        })
    }

    fn ack(&self, token: LeaseToken) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state
                .leased
                .remove(&token.0)
                .map(|_| ())
                .ok_or(QueueError::UnknownLease(token.0))
        })
    }

    fn nack(
        &self,
        token: LeaseToken,
        requeue_after: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.state.lock().await;
            let mut leased =
                state.leased.remove(&token.0).ok_or(QueueError::UnknownLease(token.0))?;

            leased.item.attempts += 1;
            let available_at = now + clamp_delay(requeue_after);

            state.ready.push(ReadyItem {
                seq: leased.seq,
                available_at,
                item: leased.item,
            });
            Ok(())
        })
    }

    fn depth(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state.ready.len() + state.leased.len()
        })
    }
}
