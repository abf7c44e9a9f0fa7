//! HTTP server setup and request routing.
//!
//! Requests flow through middleware in order: request ID injection,
//! trace logging, timeout enforcement, then the handler.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use sluice_core::Clock;
use sluice_delivery::Dispatcher;
use sluice_queue::{DeadLetterSink, EventQueue, EventStore, IdempotencyStore};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::handlers;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Time source for freshness checks.
    pub clock: Arc<dyn Clock>,
    /// Shared secret for inbound signature verification.
    pub shared_secret: String,
    /// Maximum accepted timestamp skew in seconds.
    pub freshness_window_seconds: i64,
    /// Duplicate detection store.
    pub idempotency: Arc<dyn IdempotencyStore>,
    /// Durable event queue feeding the dispatcher.
    pub queue: Arc<dyn EventQueue>,
    /// Event and attempt history store.
    pub store: Arc<dyn EventStore>,
    /// Terminal failure log.
    pub dead_letters: Arc<dyn DeadLetterSink>,
    /// Dispatcher handle, for stats.
    pub dispatcher: Arc<Dispatcher>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("freshness_window_seconds", &self.freshness_window_seconds)
            .finish_non_exhaustive()
    }
}

/// Creates the Axum router with all routes and middleware.
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/webhooks/ingest", post(handlers::ingest_webhook))
        .route("/webhooks/search", post(handlers::search_events))
        .route("/webhooks/{event_id}", get(handlers::get_event))
        .route("/dead-letters", get(handlers::list_dead_letters))
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::stats))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Adds an `X-Request-Id` header to every response for cross-service
/// tracing.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Starts the HTTP server, serving until `shutdown` resolves.
///
/// # Errors
///
/// Returns `std::io::Error` when the port is unavailable or the
/// listener fails.
pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
    request_timeout: Duration,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let app = create_router(state, request_timeout);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}
