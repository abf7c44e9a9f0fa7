//! Error types for queue and store operations.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using [`QueueError`].
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors raised by the queue, idempotency store, and event store.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// Lease token is unknown or already expired and reclaimed.
    ///
    /// An ack or nack with a stale token means another worker may
    /// already hold the item; the caller must not assume exclusive
    /// ownership.
    #[error("unknown or expired lease token {0}")]
    UnknownLease(Uuid),

    /// Event already present in the event store.
    #[error("event {0} already stored")]
    DuplicateEvent(String),

    /// Event not found in the event store.
    #[error("event {0} not found")]
    NotFound(String),
}
