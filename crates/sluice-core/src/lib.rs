//! Core domain models for the webhook ingestion and delivery pipeline.
//!
//! Provides strongly-typed domain primitives, the HMAC signature
//! verifier, and the clock abstraction shared by every other crate in
//! the workspace. No I/O lives here; everything is a pure function of
//! its inputs or a plain data type.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod models;
pub mod signature;
pub mod time;

pub use models::{
    extract_event_type, AttemptOutcome, DeadLetterEntry, DeadLetterReason, DeliveryAttempt, Event,
    EventId, EventStatus,
};
pub use signature::SignatureError;
pub use time::{Clock, RealClock, TestClock};
