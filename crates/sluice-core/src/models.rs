//! Domain types for events, delivery attempts, and dead letters.
//!
//! An [`Event`] is immutable once accepted at the HTTP boundary; all
//! delivery progress is tracked by appending [`DeliveryAttempt`]
//! records and advancing an [`EventStatus`]. A [`DeadLetterEntry`] is
//! the terminal record for events that exhausted their retry budget.

use std::{collections::HashMap, fmt};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an accepted webhook event.
///
/// Stringly typed rather than a bare UUID because the identifier may be
/// provider-supplied (idempotency key or payload `id` field) and must
/// survive byte-for-byte for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    /// Creates a fresh random identifier for events without a
    /// provider-supplied key.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of an event inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Accepted at the HTTP boundary, waiting in the queue.
    Received,
    /// Leased by a dispatcher worker, handler in flight.
    Delivering,
    /// Handler completed successfully. Terminal.
    Delivered,
    /// Retry budget exhausted or non-retryable failure. Terminal.
    DeadLettered,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Delivering => write!(f, "delivering"),
            Self::Delivered => write!(f, "delivered"),
            Self::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

/// An inbound webhook event, immutable after acceptance.
///
/// Header keys are lowercased at construction so lookups are
/// case-insensitive. The body is the exact raw bytes the signature was
/// verified over, never a re-serialized form.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique identifier, provider-supplied or generated.
    pub id: EventId,
    /// Name of the producing source (e.g. configured sender name).
    pub source: String,
    /// Event type extracted from the payload, used for handler routing.
    pub event_type: Option<String>,
    /// When the event was accepted at the HTTP boundary.
    pub received_at: DateTime<Utc>,
    /// Exact raw payload bytes as received.
    pub body: Bytes,
    /// Request headers with lowercased keys.
    pub headers: HashMap<String, String>,
    /// Whether the inbound signature verified against the shared secret.
    pub signature_verified: bool,
}

impl Event {
    /// Builds an event, lowercasing header keys for case-insensitive
    /// lookup.
    pub fn new(
        id: EventId,
        source: impl Into<String>,
        event_type: Option<String>,
        received_at: DateTime<Utc>,
        body: Bytes,
        headers: HashMap<String, String>,
    ) -> Self {
        let headers = headers.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect();
        Self {
            id,
            source: source.into(),
            event_type,
            received_at,
            body,
            headers,
            signature_verified: true,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Routing key for handler selection, `"unknown"` when the payload
    /// carried no recognizable type field.
    pub fn routing_key(&self) -> &str {
        self.event_type.as_deref().unwrap_or("unknown")
    }
}

/// Extracts the event type from a JSON payload.
///
/// Checks `event_type`, `type`, and `event` keys in that order,
/// matching what common webhook providers send.
pub fn extract_event_type(payload: &serde_json::Value) -> Option<String> {
    ["event_type", "type", "event"]
        .iter()
        .find_map(|key| payload.get(key))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Attempt is in flight, outcome not yet recorded.
    Pending,
    /// Handler or downstream endpoint accepted the event.
    Success,
    /// Handler or downstream endpoint rejected the event.
    Failed,
}

/// Record of one delivery attempt for an event.
///
/// Attempt numbers for a given event are strictly increasing and
/// contiguous starting at 1; attempts never outlive the event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Unique identifier for this attempt.
    pub id: Uuid,
    /// The event this attempt belongs to.
    pub event_id: EventId,
    /// 1-based attempt number, monotonic per event.
    pub attempt_number: u32,
    /// When the attempt was made.
    pub attempted_at: DateTime<Utc>,
    /// Final outcome of the attempt.
    pub outcome: AttemptOutcome,
    /// HTTP status returned by the downstream endpoint, when one was
    /// received.
    pub status_code: Option<u16>,
    /// Error detail when the attempt failed.
    pub error: Option<String>,
    /// Wall-clock duration of the attempt in milliseconds.
    pub duration_ms: u64,
}

impl DeliveryAttempt {
    /// Records a successful attempt.
    pub fn success(
        event_id: EventId,
        attempt_number: u32,
        attempted_at: DateTime<Utc>,
        status_code: Option<u16>,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            attempt_number,
            attempted_at,
            outcome: AttemptOutcome::Success,
            status_code,
            error: None,
            duration_ms,
        }
    }

    /// Records a failed attempt with error detail.
    pub fn failure(
        event_id: EventId,
        attempt_number: u32,
        attempted_at: DateTime<Utc>,
        status_code: Option<u16>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            attempt_number,
            attempted_at,
            outcome: AttemptOutcome::Failed,
            status_code,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// Why an event was routed to the dead-letter log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Retry budget exhausted after transient failures.
    RetriesExhausted,
    /// Failure classified as permanent, no retry attempted.
    NonRetryable,
    /// No handler registered for the event type.
    Unroutable,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted => write!(f, "retries_exhausted"),
            Self::NonRetryable => write!(f, "non_retryable"),
            Self::Unroutable => write!(f, "unroutable"),
        }
    }
}

/// Terminal, append-only record of an event that will never be
/// retried again. Requires manual or external reprocessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The event that was dead-lettered.
    pub event_id: EventId,
    /// Source name of the event.
    pub source: String,
    /// Event type, when one was present.
    pub event_type: Option<String>,
    /// Exact payload bytes, kept for manual reprocessing.
    pub payload: Bytes,
    /// Total attempts made before giving up.
    pub total_attempts: u32,
    /// Why the event was dead-lettered.
    pub reason: DeadLetterReason,
    /// Detail from the final failure.
    pub last_error: Option<String>,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}
