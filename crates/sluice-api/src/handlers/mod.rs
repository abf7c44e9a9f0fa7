//! HTTP request handlers.

mod health;
mod ingest;
mod inspect;

pub use health::health_check;
pub use ingest::ingest_webhook;
pub use inspect::{get_event, list_dead_letters, search_events, stats};
