//! Sluice webhook ingestion and delivery service.
//!
//! Main entry point. Wires the ingestion surface, the event queue, and
//! the dispatcher worker pool together and coordinates graceful
//! startup and shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sluice_api::{AppState, Config};
use sluice_core::{Clock, RealClock};
use sluice_delivery::{
    CircuitBreakerManager, DeliveryClient, Dispatcher, EventHandler, ForwardingHandler,
    HandlerRegistry,
};
use sluice_queue::{
    DeadLetterSink, EventQueue, EventStore, IdempotencyStore, InMemoryDeadLetterLog,
    InMemoryEventStore, InMemoryIdempotencyStore, InMemoryQueue,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting Sluice webhook service");

    let config = Config::load().context("configuration load failed")?;
    let addr = config.parse_server_addr()?;
    info!(
        addr = %addr,
        workers = config.worker_pool_size,
        routes = config.routes.len(),
        "configuration loaded"
    );

    if config.shared_secret == "dev-secret-key" {
        warn!("using the default development secret, override SHARED_SECRET in production");
    }

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let queue: Arc<dyn EventQueue> = Arc::new(InMemoryQueue::new(Arc::clone(&clock)));
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let dead_letters: Arc<dyn DeadLetterSink> = Arc::new(InMemoryDeadLetterLog::new());
    let idempotency: Arc<dyn IdempotencyStore> = Arc::new(InMemoryIdempotencyStore::new(
        Duration::from_secs(config.idempotency_retention_seconds),
        Arc::clone(&clock),
    ));

    let registry = build_registry(&config, Arc::clone(&clock))?;

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&queue),
        Arc::clone(&store),
        Arc::clone(&dead_letters),
        registry,
        config.to_retry_policy(),
        config.to_dispatcher_config(),
        Arc::clone(&clock),
    ));
    dispatcher.start().await;

    let state = AppState {
        clock,
        shared_secret: config.shared_secret.clone(),
        freshness_window_seconds: config.freshness_window_seconds,
        idempotency,
        queue,
        store,
        dead_letters,
        dispatcher: Arc::clone(&dispatcher),
    };

    info!(addr = %addr, "Sluice is ready to receive webhooks");

    sluice_api::start_server(
        state,
        addr,
        Duration::from_secs(config.request_timeout),
        shutdown_signal(),
    )
    .await
    .context("HTTP server failed")?;

    info!("draining dispatcher workers");
    dispatcher.shutdown().await;

    info!("Sluice shutdown complete");
    Ok(())
}

/// Builds the routing table from configuration: one forwarding handler
/// per configured event type, plus an optional catch-all downstream.
fn build_registry(config: &Config, clock: Arc<dyn Clock>) -> Result<HandlerRegistry> {
    let client = DeliveryClient::new(config.to_client_config())
        .context("failed to build delivery client")?;
    let circuits = Arc::new(CircuitBreakerManager::new(config.to_circuit_config(), clock));

    let mut registry = HandlerRegistry::new();
    for (event_type, url) in &config.routes {
        info!(event_type, url, "registering route");
        registry.register(
            event_type.clone(),
            Arc::new(ForwardingHandler::new(
                client.clone(),
                url.clone(),
                Some(config.shared_secret.clone()),
                Arc::clone(&circuits),
            )) as Arc<dyn EventHandler>,
        );
    }

    if let Some(url) = &config.downstream_url {
        info!(url, "registering catch-all downstream");
        registry.set_fallback(Arc::new(ForwardingHandler::new(
            client,
            url.clone(),
            Some(config.shared_secret.clone()),
            circuits,
        )) as Arc<dyn EventHandler>);
    } else if config.routes.is_empty() {
        warn!("no routes or downstream configured, every event will dead-letter as unroutable");
    }

    Ok(registry)
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,sluice=debug,tower_http=debug"))
        .expect("invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received CTRL+C, starting graceful shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, starting graceful shutdown");
        }
    }
}
