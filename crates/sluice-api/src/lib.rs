//! HTTP surface for Sluice: webhook ingestion, event inspection, dead
//! letter listing, health, and stats.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use error::IngestError;
pub use server::{create_router, start_server, AppState};
