//! HTTP-facing error types for the ingestion surface.
//!
//! Callers only ever see accept/reject at submission time; delivery
//! outcomes are observed asynchronously through the inspection
//! endpoints.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Rejection reasons at the ingestion boundary.
///
/// A duplicate submission is not an error; it is reported as a 200
/// with a duplicate marker in the body.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Signature missing or failed verification.
    #[error("signature verification failed")]
    VerificationFailure,

    /// Timestamp header present but outside the freshness window.
    #[error("timestamp outside freshness window")]
    StaleTimestamp,

    /// Body is not valid JSON.
    #[error("malformed JSON payload")]
    MalformedPayload,

    /// The event could not be persisted or enqueued.
    #[error("event queue unavailable")]
    QueueUnavailable,
}

impl IngestError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::VerificationFailure | Self::StaleTimestamp => StatusCode::UNAUTHORIZED,
            Self::MalformedPayload => StatusCode::BAD_REQUEST,
            Self::QueueUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(IngestError::VerificationFailure.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(IngestError::StaleTimestamp.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(IngestError::MalformedPayload.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            IngestError::QueueUnavailable.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
