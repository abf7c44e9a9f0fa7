//! Shared mutable state of the webhook pipeline: idempotency store,
//! leased event queue, event store, and dead-letter log.
//!
//! Each component is a trait describing an atomic contract plus an
//! in-memory implementation. The traits are the interface the rest of
//! the system programs against; a deployment that needs exactly-once
//! guarantees across process restarts can provide durable
//! implementations without touching the dispatcher or the HTTP layer.
//! With the in-memory implementations the system is exactly-once
//! within a process lifetime and at-least-once across restarts, with a
//! duplicate window bounded by the idempotency retention period.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dead_letter;
pub mod error;
pub mod idempotency;
pub mod queue;
pub mod store;

pub use dead_letter::{DeadLetterSink, InMemoryDeadLetterLog};
pub use error::{QueueError, Result};
pub use idempotency::{Admission, IdempotencyStore, InMemoryIdempotencyStore};
pub use queue::{EventQueue, InMemoryQueue, Lease, LeaseToken, QueueItem};
pub use store::{EventFilter, EventStore, EventSummary, InMemoryEventStore};
