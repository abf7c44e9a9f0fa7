//! Outbound delivery: HTTP forwarding client, retry scheduling,
//! per-endpoint circuit breakers, and the dispatcher worker pool that
//! drains the event queue.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod retry;

pub use circuit::{CircuitBreakerConfig, CircuitBreakerManager, CircuitState};
pub use client::{ClientConfig, DeliveryClient, DeliveryRequest, DeliveryResponse};
pub use dispatcher::{
    Dispatcher, DispatcherConfig, DispatcherStats, EventHandler, ForwardingHandler,
    HandlerRegistry, StatsSnapshot,
};
pub use error::{DeliveryError, Result};
pub use retry::RetryPolicy;
