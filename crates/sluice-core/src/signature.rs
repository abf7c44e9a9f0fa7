//! HMAC-SHA256 signature verification and signing.
//!
//! Inbound payloads are verified over the exact raw bytes received,
//! never a re-serialized form. Outbound deliveries are signed with the
//! same scheme so subscribers can verify authenticity symmetrically.
//! Malformed signatures are treated as not-verified; nothing in this
//! module panics or returns an error to the HTTP boundary.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Errors from signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The secret key was rejected by the HMAC implementation.
    #[error("invalid secret key")]
    InvalidSecret,
}

/// Verifies a claimed signature against the payload and shared secret.
///
/// Accepts `sha256=<hex>` prefixed signatures (GitHub style) or raw
/// hex. Comparison is constant-time. Returns `false` for any malformed
/// input: empty signature, empty secret, non-hex characters, wrong
/// length.
pub fn verify(payload: &[u8], claimed: &str, secret: &str) -> bool {
    if claimed.is_empty() || secret.is_empty() {
        return false;
    }

    let hex_claimed = claimed.strip_prefix("sha256=").unwrap_or(claimed);
    if hex_claimed.len() != 64 || !hex_claimed.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }

    let Ok(expected) = sign(payload, secret) else {
        return false;
    };
    constant_time_eq(hex_claimed.as_bytes(), expected.as_bytes())
}

/// Computes the hex-encoded HMAC-SHA256 of a payload.
///
/// Used both to derive the expected inbound signature and to sign
/// outbound delivery bodies.
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the HMAC implementation
/// rejects the secret key.
pub fn sign(payload: &[u8], secret: &str) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a timestamp header against a freshness window.
///
/// This is a separate, explicit replay-protection step, not folded
/// into the hash comparison. Accepts unix seconds or RFC 3339. A
/// timestamp that fails to parse is rejected; skew in either direction
/// beyond the window is rejected.
pub fn check_freshness(timestamp: &str, now: DateTime<Utc>, window_seconds: i64) -> bool {
    let Some(parsed) = parse_timestamp(timestamp) else {
        return false;
    };
    let skew = (now - parsed).num_seconds().abs();
    skew <= window_seconds
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::<Utc>::from_timestamp(secs, 0);
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
