//! On-disk value layout: an 8-byte big-endian expiry header followed by the
//! caller's payload.

use std::time::Duration;

use super::EngineError;

const HEADER_LEN: usize = 8;

/// Milliseconds since the Unix epoch, wall clock.
pub(crate) fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Absolute expiry for a write happening now.
pub(crate) fn expires_at(ttl: Duration) -> u64 {
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    now_millis().saturating_add(ttl_ms)
}

pub(crate) fn encode(expires_at_ms: u64, payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(HEADER_LEN + payload.len());
    raw.extend_from_slice(&expires_at_ms.to_be_bytes());
    raw.extend_from_slice(payload);
    raw
}

/// Splits a stored value into its expiry and payload.
pub(crate) fn decode(raw: &[u8]) -> Result<(u64, &[u8]), EngineError> {
    if raw.len() < HEADER_LEN {
        return Err(EngineError::Backend {
            message: format!("truncated record header: {} bytes", raw.len()),
            source: None,
        });
    }
    let (header, payload) = raw.split_at(HEADER_LEN);
    let mut expiry = [0u8; HEADER_LEN];
    expiry.copy_from_slice(header);
    Ok((u64::from_be_bytes(expiry), payload))
}

pub(crate) fn is_expired(expires_at_ms: u64, now_ms: u64) -> bool {
    expires_at_ms <= now_ms
}
