//! Webhook ingestion handler.
//!
//! Accepts an inbound event, verifies its signature over the exact raw
//! bytes, checks timestamp freshness, runs duplicate detection, and
//! enqueues it for asynchronous delivery. The response only reports
//! acceptance; delivery outcomes are observed via the inspection
//! endpoints.

use std::collections::HashMap;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use sluice_core::{extract_event_type, signature, Event, EventId};
use sluice_queue::{Admission, QueueError};
use tracing::{info, instrument, warn};

use crate::{error::IngestError, server::AppState};

/// Response for accepted and duplicate submissions.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Identifier the event is tracked under.
    pub event_id: String,
    /// `received` for first acceptance, `duplicate` for resubmission.
    pub status: String,
}

/// Ingests a webhook event.
///
/// Identifier derivation order: `X-Idempotency-Key` header, payload
/// `id` field, fresh UUID. Verification happens before any parsing so
/// unauthenticated payloads never reach the JSON decoder.
#[instrument(
    name = "ingest_webhook",
    skip(state, headers, body),
    fields(
        content_length = body.len(),
        idempotency_key = headers.get("x-idempotency-key").and_then(|v| v.to_str().ok()).unwrap_or("none"),
    )
)]
pub async fn ingest_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(claimed) = header_str(&headers, "x-signature") else {
        warn!("missing signature header");
        return IngestError::VerificationFailure.into_response();
    };

    if !signature::verify(&body, claimed, &state.shared_secret) {
        warn!("signature verification failed");
        return IngestError::VerificationFailure.into_response();
    }

    // Freshness is only enforced when the sender supplied a timestamp.
    if let Some(timestamp) = header_str(&headers, "x-timestamp") {
        if !signature::check_freshness(timestamp, state.clock.now(), state.freshness_window_seconds)
        {
            warn!(timestamp, "timestamp outside freshness window");
            return IngestError::StaleTimestamp.into_response();
        }
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "malformed JSON payload");
            return IngestError::MalformedPayload.into_response();
        }
    };

    let event_id = derive_event_id(&headers, &payload);
    let event_type = extract_event_type(&payload);
    let source = header_str(&headers, "x-webhook-source").unwrap_or("default").to_string();

    match state.idempotency.admit(&event_id).await {
        Ok(Admission::Accepted) => {}
        Ok(Admission::Duplicate) => {
            info!(event_id = %event_id, "duplicate submission");
            return (
                StatusCode::OK,
                Json(IngestResponse {
                    event_id: event_id.to_string(),
                    status: "duplicate".to_string(),
                }),
            )
                .into_response();
        }
        Err(e) => {
            warn!(event_id = %event_id, error = %e, "idempotency admission failed");
            return IngestError::QueueUnavailable.into_response();
        }
    }

    let event = Event::new(
        event_id.clone(),
        source,
        event_type,
        state.clock.now(),
        body,
        collect_headers(&headers),
    );

    match state.store.insert(event.clone()).await {
        Ok(()) => {}
        // The idempotency entry can expire while the event itself is
        // still stored; a resubmission then re-admits but must not be
        // treated as a failure.
        Err(QueueError::DuplicateEvent(_)) => {
            info!(event_id = %event_id, "event already stored, idempotency entry refreshed");
            return (
                StatusCode::OK,
                Json(IngestResponse {
                    event_id: event_id.to_string(),
                    status: "duplicate".to_string(),
                }),
            )
                .into_response();
        }
        Err(e) => {
            warn!(event_id = %event_id, error = %e, "event store insert failed");
            release_admission(&state, &event_id).await;
            return IngestError::QueueUnavailable.into_response();
        }
    }

    if let Err(e) = state.queue.enqueue(event, state.clock.now()).await {
        warn!(event_id = %event_id, error = %e, "enqueue failed");
        release_admission(&state, &event_id).await;
        return IngestError::QueueUnavailable.into_response();
    }

    info!(event_id = %event_id, "event accepted");
    (
        StatusCode::OK,
        Json(IngestResponse { event_id: event_id.to_string(), status: "received".to_string() }),
    )
        .into_response()
}

/// Re-opens the identifier after a persistence failure so the sender's
/// retry is not misclassified as a duplicate.
async fn release_admission(state: &AppState, event_id: &EventId) {
    if let Err(e) = state.idempotency.release(event_id).await {
        warn!(event_id = %event_id, error = %e, "failed to release idempotency entry");
    }
}

fn derive_event_id(headers: &HeaderMap, payload: &serde_json::Value) -> EventId {
    if let Some(key) = header_str(headers, "x-idempotency-key") {
        if !key.is_empty() {
            return EventId::from(key);
        }
    }
    if let Some(id) = payload.get("id").and_then(serde_json::Value::as_str) {
        return EventId::from(id);
    }
    EventId::generate()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(key, value)| {
            value.to_str().ok().map(|v| (key.as_str().to_string(), v.to_string()))
        })
        .collect()
}
