//! Dispatcher: leases queued events, routes them to handlers, and
//! drives the retry pipeline.
//!
//! A pool of supervised workers polls the queue under cancellation.
//! Each leased event is routed by its event type; success acks,
//! retryable failure nacks with a backoff delay, permanent failure or
//! an exhausted budget dead-letters. Attempt numbers stay contiguous
//! because every recorded failure, including circuit-blocked attempts,
//! consumes one slot of the budget.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use sluice_core::{Clock, DeadLetterEntry, DeadLetterReason, DeliveryAttempt, Event, EventStatus};
use sluice_queue::{DeadLetterSink, EventQueue, EventStore, Lease};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    circuit::CircuitBreakerManager,
    client::{DeliveryClient, DeliveryRequest},
    error::{DeliveryError, Result},
    retry::RetryPolicy,
};

/// Processes one event delivery.
///
/// Returns the downstream HTTP status when the handler performed an
/// HTTP call, `None` for purely local handlers.
pub trait EventHandler: Send + Sync + 'static {
    /// Handles a single delivery attempt for `event`.
    fn handle(
        &self,
        event: &Event,
        attempt_number: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u16>>> + Send + '_>>;
}

/// Maps event types to handlers, with an optional catch-all fallback.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    fallback: Option<Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an event type, replacing any previous
    /// registration.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    /// Sets the catch-all handler for event types with no explicit
    /// registration.
    pub fn set_fallback(&mut self, handler: Arc<dyn EventHandler>) {
        self.fallback = Some(handler);
    }

    /// Resolves the handler for a routing key.
    pub fn resolve(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(event_type).cloned().or_else(|| self.fallback.clone())
    }

    /// Registered event types, for diagnostics.
    pub fn routes(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("routes", &self.routes())
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Handler that forwards the raw event payload to a downstream URL,
/// signing it and consulting the endpoint's circuit breaker.
#[derive(Debug)]
pub struct ForwardingHandler {
    client: DeliveryClient,
    url: String,
    signing_secret: Option<String>,
    circuits: Arc<CircuitBreakerManager>,
}

impl ForwardingHandler {
    /// Creates a forwarding handler for one downstream URL.
    pub fn new(
        client: DeliveryClient,
        url: impl Into<String>,
        signing_secret: Option<String>,
        circuits: Arc<CircuitBreakerManager>,
    ) -> Self {
        Self { client, url: url.into(), signing_secret, circuits }
    }
}

impl EventHandler for ForwardingHandler {
    fn handle(
        &self,
        event: &Event,
        attempt_number: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u16>>> + Send + '_>> {
        let signature = match self.signing_secret.as_deref() {
            Some(secret) => match sluice_core::signature::sign(&event.body, secret) {
                Ok(sig) => Some(sig),
                Err(e) => {
                    return Box::pin(async move {
                        Err(DeliveryError::Configuration(format!("signing failed: {e}")))
                    });
                }
            },
            None => None,
        };

        let request = DeliveryRequest {
            event_id: event.id.clone(),
            url: self.url.clone(),
            attempt_number,
            body: event.body.clone(),
            signature,
            headers: event.headers.clone(),
        };

        Box::pin(async move {
            if !self.circuits.allow(&self.url).await {
                return Err(DeliveryError::CircuitOpen { endpoint: self.url.clone() });
            }

            match self.client.deliver(request).await {
                Ok(response) => {
                    self.circuits.record_success(&self.url).await;
                    Ok(Some(response.status_code))
                }
                Err(e) => {
                    self.circuits.record_failure(&self.url).await;
                    Err(e)
                }
            }
        })
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,
    /// How long an idle worker waits before polling again.
    pub poll_interval: Duration,
    /// Lease duration granted per claimed event.
    pub lease_duration: Duration,
    /// How long shutdown waits for in-flight work.
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            poll_interval: Duration::from_millis(100),
            lease_duration: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Monotonic counters exposed through the stats endpoint.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    delivered: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Point-in-time stats snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Events delivered successfully.
    pub delivered: u64,
    /// Failed attempts that were requeued for retry.
    pub retried: u64,
    /// Events routed to the dead-letter log.
    pub dead_lettered: u64,
}

impl DispatcherStats {
    /// Reads all counters at once.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

struct DispatcherInner {
    queue: Arc<dyn EventQueue>,
    store: Arc<dyn EventStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    registry: HandlerRegistry,
    policy: RetryPolicy,
    config: DispatcherConfig,
    stats: DispatcherStats,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

/// Worker pool that drains the event queue.
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given pipeline components.
    pub fn new(
        queue: Arc<dyn EventQueue>,
        store: Arc<dyn EventStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
        registry: HandlerRegistry,
        policy: RetryPolicy,
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                queue,
                store,
                dead_letters,
                registry,
                policy,
                config,
                stats: DispatcherStats::default(),
                clock,
                cancel: CancellationToken::new(),
            }),
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    /// Current stats counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Spawns the configured workers. Returns once all are running.
    pub async fn start(&self) {
        let mut handles = self.worker_handles.lock().await;
        info!(worker_count = self.inner.config.worker_count, "starting dispatcher workers");

        for worker_id in 0..self.inner.config.worker_count {
            let inner = Arc::clone(&self.inner);
            handles.push(tokio::spawn(async move {
                info!(worker_id, "dispatcher worker starting");
                run_worker(worker_id, &inner).await;
                info!(worker_id, "dispatcher worker stopped");
            }));
        }
    }

    /// Signals cancellation and waits for workers, bounded by the
    /// configured shutdown timeout.
    pub async fn shutdown(&self) {
        info!("dispatcher shutdown requested");
        self.inner.cancel.cancel();

        let mut handles = self.worker_handles.lock().await;
        let join_all = async {
            for handle in handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "dispatcher worker panicked");
                }
            }
        };

        if tokio::time::timeout(self.inner.config.shutdown_timeout, join_all).await.is_err() {
            warn!(
                timeout_ms = self.inner.config.shutdown_timeout.as_millis() as u64,
                "dispatcher shutdown timed out with workers still running"
            );
        }
    }

    /// Processes everything currently visible in the queue and returns
    /// the number of events handled. Drives the same per-event path as
    /// the workers, without spawning any.
    pub async fn process_available(&self) -> usize {
        let mut processed = 0;
        loop {
            let lease = match self.inner.queue.lease(0, self.inner.config.lease_duration).await {
                Ok(Some(lease)) => lease,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "queue lease failed");
                    break;
                }
            };
            process_lease(&self.inner, lease).await;
            processed += 1;
        }
        processed
    }
}

async fn run_worker(worker_id: usize, inner: &DispatcherInner) {
    loop {
        if inner.cancel.is_cancelled() {
            return;
        }

        match inner.queue.lease(worker_id, inner.config.lease_duration).await {
            Ok(Some(lease)) => {
                process_lease(inner, lease).await;
            }
            Ok(None) => {
                tokio::select! {
                    () = inner.cancel.cancelled() => return,
                    () = inner.clock.sleep(inner.config.poll_interval) => {}
                }
            }
            Err(e) => {
                error!(worker_id, error = %e, "queue lease failed");
                tokio::select! {
                    () = inner.cancel.cancelled() => return,
                    () = inner.clock.sleep(inner.config.poll_interval) => {}
                }
            }
        }
    }
}

async fn process_lease(inner: &DispatcherInner, lease: Lease) {
    let event = lease.item.event.clone();
    let attempt_number = lease.item.next_attempt_number();

    if let Err(e) = inner.store.set_status(&event.id, EventStatus::Delivering).await {
        warn!(event_id = %event.id, error = %e, "failed to mark event delivering");
    }

    let Some(handler) = inner.registry.resolve(event.routing_key()) else {
        let error = DeliveryError::Unroutable { event_type: event.routing_key().to_string() };
        warn!(event_id = %event.id, event_type = event.routing_key(), "no handler for event");
        finish_dead_letter(inner, &lease, &event, lease.item.attempts, &error).await;
        return;
    };

    let started = std::time::Instant::now();
    let outcome = tokio::select! {
        outcome = handler.handle(&event, attempt_number) => outcome,
        () = inner.cancel.cancelled() => {
            abort_lease(inner, &lease, &event, attempt_number, started).await;
            return;
        }
    };
    let duration_ms = started.elapsed().as_millis() as u64;
    let now = inner.clock.now();

    match outcome {
        Ok(status_code) => {
            let attempt = DeliveryAttempt::success(
                event.id.clone(),
                attempt_number,
                now,
                status_code,
                duration_ms,
            );
            if let Err(e) = inner.store.record_attempt(attempt).await {
                warn!(event_id = %event.id, error = %e, "failed to record attempt");
            }
            if let Err(e) = inner.store.set_status(&event.id, EventStatus::Delivered).await {
                warn!(event_id = %event.id, error = %e, "failed to mark event delivered");
            }
            if let Err(e) = inner.queue.ack(lease.token).await {
                warn!(event_id = %event.id, error = %e, "ack failed after delivery");
            }
            inner.stats.delivered.fetch_add(1, Ordering::Relaxed);
            info!(event_id = %event.id, attempt = attempt_number, "event delivered");
        }
        Err(error) => {
            let attempt = DeliveryAttempt::failure(
                event.id.clone(),
                attempt_number,
                now,
                error.status_code(),
                error.to_string(),
                duration_ms,
            );
            if let Err(e) = inner.store.record_attempt(attempt).await {
                warn!(event_id = %event.id, error = %e, "failed to record attempt");
            }

            let failed_attempts = attempt_number;
            if !error.is_retryable() || inner.policy.should_dead_letter(failed_attempts) {
                finish_dead_letter(inner, &lease, &event, failed_attempts, &error).await;
                return;
            }

            let delay = inner
                .policy
                .next_delay(failed_attempts, error.retry_after_seconds().map(Duration::from_secs));
            warn!(
                event_id = %event.id,
                attempt = attempt_number,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "delivery failed, retry scheduled"
            );
            if let Err(e) = inner.store.set_status(&event.id, EventStatus::Received).await {
                warn!(event_id = %event.id, error = %e, "failed to reset event status");
            }
            if let Err(e) = inner.queue.nack(lease.token, delay).await {
                warn!(event_id = %event.id, error = %e, "nack failed, lease will expire");
            }
            inner.stats.retried.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Hands an in-flight event back to the queue when shutdown interrupts
/// its delivery. The aborted attempt is recorded so attempt numbers
/// stay contiguous with the nack's increment.
async fn abort_lease(
    inner: &DispatcherInner,
    lease: &Lease,
    event: &Event,
    attempt_number: u32,
    started: std::time::Instant,
) {
    warn!(event_id = %event.id, attempt = attempt_number, "delivery aborted by shutdown");
    let attempt = DeliveryAttempt::failure(
        event.id.clone(),
        attempt_number,
        inner.clock.now(),
        None,
        "delivery aborted by shutdown",
        started.elapsed().as_millis() as u64,
    );
    if let Err(e) = inner.store.record_attempt(attempt).await {
        warn!(event_id = %event.id, error = %e, "failed to record aborted attempt");
    }
    if let Err(e) = inner.store.set_status(&event.id, EventStatus::Received).await {
        warn!(event_id = %event.id, error = %e, "failed to reset event status");
    }
    if let Err(e) = inner.queue.nack(lease.token, Duration::ZERO).await {
        warn!(event_id = %event.id, error = %e, "nack failed, lease will expire");
    }
}

async fn finish_dead_letter(
    inner: &DispatcherInner,
    lease: &Lease,
    event: &Event,
    total_attempts: u32,
    error: &DeliveryError,
) {
    let reason = match error {
        DeliveryError::Unroutable { .. } => DeadLetterReason::Unroutable,
        e if e.is_retryable() => DeadLetterReason::RetriesExhausted,
        _ => DeadLetterReason::NonRetryable,
    };

    let entry = DeadLetterEntry {
        event_id: event.id.clone(),
        source: event.source.clone(),
        event_type: event.event_type.clone(),
        payload: event.body.clone(),
        total_attempts,
        reason,
        last_error: Some(error.to_string()),
        created_at: inner.clock.now(),
    };

    if let Err(e) = inner.dead_letters.record(entry).await {
        error!(event_id = %event.id, error = %e, "failed to record dead letter");
    }
    if let Err(e) = inner.store.set_status(&event.id, EventStatus::DeadLettered).await {
        warn!(event_id = %event.id, error = %e, "failed to mark event dead-lettered");
    }
    if let Err(e) = inner.queue.ack(lease.token).await {
        warn!(event_id = %event.id, error = %e, "ack failed after dead-letter");
    }
    inner.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
}
