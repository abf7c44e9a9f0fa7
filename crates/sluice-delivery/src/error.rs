//! Delivery error taxonomy.
//!
//! The retryable/permanent split here drives the whole retry pipeline:
//! retryable failures go back to the queue with a backoff delay,
//! permanent failures dead-letter immediately.

use thiserror::Error;

/// Failure modes of a delivery attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Connection-level failure before a response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The downstream endpoint did not respond within the deadline.
    #[error("delivery timed out after {0}ms")]
    Timeout(u64),

    /// Downstream returned a 4xx other than 429. The request is
    /// malformed or rejected; retrying the same bytes cannot succeed.
    #[error("client error: HTTP {status}")]
    ClientError {
        /// Status code returned by the endpoint.
        status: u16,
    },

    /// Downstream returned a 5xx. Transient by assumption.
    #[error("server error: HTTP {status}")]
    ServerError {
        /// Status code returned by the endpoint.
        status: u16,
    },

    /// Downstream returned 429, optionally naming a wait via
    /// `Retry-After`.
    #[error("rate limited by endpoint")]
    RateLimited {
        /// Parsed `Retry-After` value in seconds, when present.
        retry_after_seconds: Option<u64>,
    },

    /// Circuit breaker for the endpoint is open; the attempt was not
    /// sent.
    #[error("circuit open for endpoint {endpoint}")]
    CircuitOpen {
        /// The endpoint whose circuit rejected the attempt.
        endpoint: String,
    },

    /// No handler is registered for the event's routing key.
    #[error("no handler for event type '{event_type}'")]
    Unroutable {
        /// Routing key that failed to resolve.
        event_type: String,
    },

    /// Misconfiguration detected at dispatch time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Whether the failure is worth retrying with the same request.
    ///
    /// A blocked circuit counts as retryable: the endpoint may recover
    /// within the retry budget, and the blocked attempt still consumes
    /// one slot of that budget.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_)
            | Self::Timeout(_)
            | Self::ServerError { .. }
            | Self::RateLimited { .. }
            | Self::CircuitOpen { .. } => true,
            Self::ClientError { .. }
            | Self::Unroutable { .. }
            | Self::Configuration(_)
            | Self::Internal(_) => false,
        }
    }

    /// Endpoint-requested delay, when the failure carried one.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds } => *retry_after_seconds,
            _ => None,
        }
    }

    /// HTTP status associated with the failure, when one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientError { status } | Self::ServerError { status } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

/// Convenience alias for delivery results.
pub type Result<T> = std::result::Result<T, DeliveryError>;
