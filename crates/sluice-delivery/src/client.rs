//! HTTP client for outbound event forwarding.
//!
//! Handles request construction, response capture, and error
//! categorization so the dispatcher only sees the retryable/permanent
//! split from [`DeliveryError`].

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use reqwest::header::HeaderMap;
use sluice_core::EventId;
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{DeliveryError, Result};

const MAX_CAPTURED_BODY: usize = 1024;

/// Configuration for the outbound HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request timeout. Keep below the dispatcher's lease duration
    /// so a slow delivery resolves before its lease expires.
    pub timeout: Duration,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Maximum redirects to follow.
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: "Sluice-Delivery/0.1".to_string(),
            max_redirects: 3,
        }
    }
}

/// One outbound forwarding request.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// The event being forwarded.
    pub event_id: EventId,
    /// Destination URL.
    pub url: String,
    /// 1-based attempt number, surfaced to the endpoint as a header.
    pub attempt_number: u32,
    /// Exact payload bytes as accepted at ingestion.
    pub body: Bytes,
    /// Hex HMAC-SHA256 signature over the body, when outbound signing
    /// is configured.
    pub signature: Option<String>,
    /// Extra headers forwarded from the original request.
    pub headers: HashMap<String, String>,
}

/// Captured response from a successful (2xx) delivery.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated for audit storage.
    pub body: String,
    /// Wall-clock duration of the request.
    pub duration: Duration,
}

/// Connection-pooled HTTP client for event forwarding.
///
/// Non-2xx responses are returned as categorized errors rather than
/// responses, so callers branch on [`DeliveryError::is_retryable`]
/// alone.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl DeliveryClient {
    /// Builds a client from configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| {
                DeliveryError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, timeout: config.timeout })
    }

    /// Builds a client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Forwards an event payload to its destination.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::Network`] for connection failures
    /// - [`DeliveryError::Timeout`] when the deadline elapses
    /// - [`DeliveryError::RateLimited`] for 429, with any `Retry-After`
    /// - [`DeliveryError::ClientError`] for other 4xx
    /// - [`DeliveryError::ServerError`] for 5xx
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let start = std::time::Instant::now();

        let span = info_span!(
            "delivery",
            event_id = %request.event_id,
            url = %request.url,
            attempt = request.attempt_number
        );

        async move {
            let mut http_request = self
                .client
                .post(&request.url)
                .body(request.body.clone())
                .header("content-type", "application/json")
                .header("X-Sluice-Event-Id", request.event_id.to_string())
                .header("X-Sluice-Delivery-Attempt", request.attempt_number.to_string());

            if let Some(signature) = &request.signature {
                http_request = http_request.header("X-Signature", format!("sha256={signature}"));
            }

            for (key, value) in &request.headers {
                if !is_managed_header(key) {
                    http_request = http_request.header(key, value);
                }
            }

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(duration_ms = start.elapsed().as_millis() as u64, "request failed: {e}");
                    if e.is_timeout() {
                        return Err(DeliveryError::Timeout(self.timeout.as_millis() as u64));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::Network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::Network(e.to_string()));
                }
            };

            let duration = start.elapsed();
            let status = response.status().as_u16();
            let headers = header_map_to_hashmap(response.headers());

            debug!(status, duration_ms = duration.as_millis() as u64, "response received");

            match status {
                200..=299 => {
                    let body = read_truncated_body(response).await;
                    Ok(DeliveryResponse { status_code: status, body, duration })
                }
                429 => Err(DeliveryError::RateLimited {
                    retry_after_seconds: extract_retry_after_seconds(&headers),
                }),
                400..=499 => Err(DeliveryError::ClientError { status }),
                _ => Err(DeliveryError::ServerError { status }),
            }
        }
        .instrument(span)
        .await
    }
}

async fn read_truncated_body(response: reqwest::Response) -> String {
    match response.bytes().await {
        Ok(bytes) if bytes.len() > MAX_CAPTURED_BODY => {
            let suffix = "... (truncated)";
            let truncated = String::from_utf8_lossy(&bytes[..MAX_CAPTURED_BODY - suffix.len()]);
            format!("{truncated}{suffix}")
        }
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => format!("[failed to read response body: {e}]"),
    }
}

fn header_map_to_hashmap(header_map: &HeaderMap) -> HashMap<String, String> {
    header_map
        .iter()
        .filter_map(|(key, value)| {
            value.to_str().ok().map(|v| (key.to_string(), v.to_string()))
        })
        .collect()
}

/// Headers owned by the transport that must not be copied from the
/// inbound request.
fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.to_lowercase();
    matches!(
        lowercase.as_str(),
        "content-length"
            | "content-type"
            | "host"
            | "user-agent"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "x-signature"
    )
}

/// Parses a `Retry-After` header into seconds.
///
/// Supports the integer-seconds form and the HTTP-date form. An
/// unparseable value falls back to 60 seconds rather than being
/// ignored, since the endpoint did ask for a wait.
pub fn extract_retry_after_seconds(headers: &HashMap<String, String>) -> Option<u64> {
    const FALLBACK_RETRY_AFTER: u64 = 60;

    let retry_after = headers.get("retry-after").or_else(|| headers.get("Retry-After"))?;

    if let Ok(seconds) = retry_after.parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(date_time) = chrono::DateTime::parse_from_rfc2822(retry_after) {
        let now = chrono::Utc::now();
        let retry_time = date_time.with_timezone(&chrono::Utc);
        if retry_time > now {
            if let Ok(duration) = retry_time.signed_duration_since(now).to_std() {
                return Some(duration.as_secs());
            }
        }
    }

    Some(FALLBACK_RETRY_AFTER)
}
