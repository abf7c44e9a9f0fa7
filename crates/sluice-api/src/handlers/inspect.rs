//! Inspection endpoints: event lookup, search, dead letters, and
//! stats.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sluice_core::{AttemptOutcome, DeadLetterEntry, DeliveryAttempt, EventId, EventStatus};
use sluice_queue::{EventFilter, EventSummary};
use tracing::instrument;

use crate::server::AppState;

const MAX_EVENT_ID_LEN: usize = 256;
const MAX_SEARCH_LIMIT: usize = 500;

fn default_search_limit() -> usize {
    50
}

/// Event detail returned by the lookup endpoint.
#[derive(Debug, Serialize)]
pub struct EventView {
    /// Event identifier.
    pub event_id: String,
    /// Producing source name.
    pub source: String,
    /// Routing event type, when present.
    pub event_type: Option<String>,
    /// Current lifecycle status.
    pub status: String,
    /// When the event was accepted.
    pub received_at: DateTime<Utc>,
    /// Delivery attempt history, oldest first.
    pub attempts: Vec<AttemptView>,
}

/// One delivery attempt in the event view.
#[derive(Debug, Serialize)]
pub struct AttemptView {
    /// 1-based attempt number.
    pub attempt_number: u32,
    /// When the attempt was made.
    pub attempted_at: DateTime<Utc>,
    /// Final outcome of the attempt.
    pub outcome: AttemptOutcome,
    /// Downstream HTTP status, when one was received.
    pub status_code: Option<u16>,
    /// Error detail for failed attempts.
    pub error: Option<String>,
    /// Attempt duration in milliseconds.
    pub duration_ms: u64,
}

impl From<DeliveryAttempt> for AttemptView {
    fn from(attempt: DeliveryAttempt) -> Self {
        Self {
            attempt_number: attempt.attempt_number,
            attempted_at: attempt.attempted_at,
            outcome: attempt.outcome,
            status_code: attempt.status_code,
            error: attempt.error,
            duration_ms: attempt.duration_ms,
        }
    }
}

/// Looks up an event and its attempt history by id.
#[instrument(name = "get_event", skip(state))]
pub async fn get_event(State(state): State<AppState>, Path(event_id): Path<String>) -> Response {
    if event_id.is_empty() || event_id.len() > MAX_EVENT_ID_LEN {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "malformed event id" })))
            .into_response();
    }

    let id = EventId(event_id);
    let Some(event) = state.store.find_event(&id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "event not found" })))
            .into_response();
    };

    let status = state
        .store
        .find_status(&id)
        .await
        .map(|s| s.to_string())
        .unwrap_or_else(|| "received".to_string());
    let attempts =
        state.store.find_attempts(&id).await.into_iter().map(AttemptView::from).collect();

    let view = EventView {
        event_id: event.id.to_string(),
        source: event.source,
        event_type: event.event_type,
        status,
        received_at: event.received_at,
        attempts,
    };

    (StatusCode::OK, Json(view)).into_response()
}

/// Search criteria accepted by the search endpoint. All filters are
/// optional; an empty body matches everything.
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    /// Match only events in this lifecycle status.
    #[serde(default)]
    pub status: Option<EventStatus>,
    /// Match only events with this routing type.
    #[serde(default)]
    pub event_type: Option<String>,
    /// Match only events received at or after this instant.
    #[serde(default)]
    pub from_date: Option<DateTime<Utc>>,
    /// Match only events received at or before this instant.
    #[serde(default)]
    pub to_date: Option<DateTime<Utc>>,
    /// Matches to skip, for pagination.
    #[serde(default)]
    pub skip: usize,
    /// Maximum matches to return.
    #[serde(default = "default_search_limit")]
    pub limit: usize,
    /// Whether to compute aggregations over the full match set.
    #[serde(default)]
    pub include_aggregations: bool,
}

/// One matched event in a search result.
#[derive(Debug, Serialize)]
pub struct SearchEventView {
    /// Event identifier.
    pub event_id: String,
    /// Producing source name.
    pub source: String,
    /// Routing event type, when present.
    pub event_type: Option<String>,
    /// Current lifecycle status.
    pub status: String,
    /// When the event was accepted.
    pub received_at: DateTime<Utc>,
    /// Delivery attempts recorded so far.
    pub attempt_count: u32,
}

impl From<EventSummary> for SearchEventView {
    fn from(summary: EventSummary) -> Self {
        Self {
            event_id: summary.event.id.to_string(),
            source: summary.event.source,
            event_type: summary.event.event_type,
            status: summary.status.to_string(),
            received_at: summary.event.received_at,
            attempt_count: summary.attempt_count,
        }
    }
}

/// Counts over the full match set, computed before pagination.
#[derive(Debug, Default, Serialize)]
pub struct SearchAggregations {
    /// Total events matched.
    pub total_count: usize,
    /// Match count per lifecycle status.
    pub by_status: BTreeMap<String, u64>,
    /// Match count per event type, `"unknown"` when untyped.
    pub by_event_type: BTreeMap<String, u64>,
    /// Match count per receive hour, keyed `YYYY-MM-DDTHH:00:00Z`.
    pub hourly_histogram: BTreeMap<String, u64>,
}

fn build_aggregations(matches: &[EventSummary]) -> SearchAggregations {
    let mut aggregations = SearchAggregations { total_count: matches.len(), ..Default::default() };
    for summary in matches {
        *aggregations.by_status.entry(summary.status.to_string()).or_default() += 1;
        *aggregations
            .by_event_type
            .entry(summary.event.routing_key().to_string())
            .or_default() += 1;
        let hour = summary.event.received_at.format("%Y-%m-%dT%H:00:00Z").to_string();
        *aggregations.hourly_histogram.entry(hour).or_default() += 1;
    }
    aggregations
}

/// Searches events by status, type, and receive-time range, with
/// pagination and optional aggregations over the full match set.
#[instrument(name = "search_events", skip(state, request))]
pub async fn search_events(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Response {
    let filter = EventFilter {
        status: request.status,
        event_type: request.event_type.clone(),
        from: request.from_date,
        to: request.to_date,
    };

    let matches = state.store.find_events(filter).await;
    let total = matches.len();
    let aggregations = request.include_aggregations.then(|| build_aggregations(&matches));

    let limit = request.limit.min(MAX_SEARCH_LIMIT);
    let events: Vec<SearchEventView> =
        matches.into_iter().skip(request.skip).take(limit).map(SearchEventView::from).collect();

    let body = json!({
        "events": events,
        "total": total,
        "skip": request.skip,
        "limit": limit,
        "aggregations": aggregations,
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// Dead letter record returned by the inspection endpoint.
#[derive(Debug, Serialize)]
pub struct DeadLetterView {
    /// The dead-lettered event.
    pub event_id: String,
    /// Producing source name.
    pub source: String,
    /// Routing event type, when present.
    pub event_type: Option<String>,
    /// Payload as UTF-8, lossily decoded for display.
    pub payload: String,
    /// Attempts made before giving up.
    pub total_attempts: u32,
    /// Why the event was dead-lettered.
    pub reason: String,
    /// Final failure detail.
    pub last_error: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl From<DeadLetterEntry> for DeadLetterView {
    fn from(entry: DeadLetterEntry) -> Self {
        Self {
            event_id: entry.event_id.to_string(),
            source: entry.source,
            event_type: entry.event_type,
            payload: String::from_utf8_lossy(&entry.payload).into_owned(),
            total_attempts: entry.total_attempts,
            reason: entry.reason.to_string(),
            last_error: entry.last_error,
            created_at: entry.created_at,
        }
    }
}

/// Lists all dead-lettered events, oldest first.
#[instrument(name = "list_dead_letters", skip(state))]
pub async fn list_dead_letters(State(state): State<AppState>) -> Response {
    match state.dead_letters.entries().await {
        Ok(entries) => {
            let views: Vec<DeadLetterView> =
                entries.into_iter().map(DeadLetterView::from).collect();
            (StatusCode::OK, Json(json!({ "dead_letters": views }))).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Reports dispatcher counters and queue gauges.
#[instrument(name = "stats", skip(state))]
pub async fn stats(State(state): State<AppState>) -> Response {
    let snapshot = state.dispatcher.stats();
    let body = json!({
        "delivered": snapshot.delivered,
        "retried": snapshot.retried,
        "dead_lettered": snapshot.dead_lettered,
        "queue_depth": state.queue.depth().await,
        "idempotency_entries": state.idempotency.len().await,
    });
    (StatusCode::OK, Json(body)).into_response()
}
