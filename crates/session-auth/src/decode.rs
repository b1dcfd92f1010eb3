//! Access token expiry decoding
//!
//! Reads the `exp` claim out of a compact JWT without verifying the
//! signature or contacting the backend. The backend is the only party that
//! validates tokens; the client just needs to know when to renew one.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::error::{Error, Result};

/// Decode the expiry of `token` as milliseconds since the unix epoch.
///
/// The claim is `exp` in seconds (integer or fractional). Anything that is
/// not a three-segment token with a base64url JSON payload carrying a
/// non-negative numeric `exp` is `MalformedToken`.
pub fn decode_expiry(token: &str) -> Result<u64> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(Error::MalformedToken(format!(
            "expected 3 segments, got {}",
            token.split('.').count()
        )));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::MalformedToken(format!("payload is not base64url: {e}")))?;

    let claims: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::MalformedToken(format!("payload is not JSON: {e}")))?;

    let exp = claims
        .get("exp")
        .ok_or_else(|| Error::MalformedToken("missing exp claim".into()))?;

    if let Some(secs) = exp.as_u64() {
        return secs
            .checked_mul(1000)
            .ok_or_else(|| Error::MalformedToken(format!("exp out of range: {secs}")));
    }

    match exp.as_f64() {
        Some(secs) if secs >= 0.0 => Ok((secs * 1000.0) as u64),
        _ => Err(Error::MalformedToken(format!("exp is not a valid timestamp: {exp}"))),
    }
}

/// Whether `token` must be treated as unusable at `now_millis`.
///
/// An undecodable token counts as expired.
pub fn is_expired(token: &str, now_millis: u64) -> bool {
    match decode_expiry(token) {
        Ok(expires_at) => expires_at <= now_millis,
        Err(_) => true,
    }
}
