//! Token expiry decoding
//!
//! Reads the `exp` claim out of a JWT-shaped token without verifying the
//! signature. Used for bookkeeping only; nothing here is a trust decision.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Self-reported expiry of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenExpiry {
    pub exp_seconds: i64,
    pub expires_at_ms: i64,
}

/// Decode the `exp` claim of a three-segment token.
///
/// Returns `None` for a wrong segment count, bad base64, a payload that is
/// not a JSON object, or a missing/non-numeric `exp`.
pub fn decode_expiry(token: &str) -> Option<TokenExpiry> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return None;
    }

    let payload = decode_segment(segments[1])?;
    let claims: serde_json::Value = serde_json::from_slice(&payload).ok()?;
    let exp = claims.as_object()?.get("exp")?;

    if let Some(secs) = exp.as_i64() {
        return Some(TokenExpiry {
            exp_seconds: secs,
            expires_at_ms: secs.checked_mul(1000)?,
        });
    }

    let secs = exp.as_f64().filter(|v| v.is_finite())?;
    Some(TokenExpiry {
        exp_seconds: secs.trunc() as i64,
        expires_at_ms: (secs * 1000.0) as i64,
    })
}

/// base64url first, then standard alphabet; padding is optional
fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    let trimmed = segment.trim_end_matches('=');
    if trimmed.is_empty() {
        return None;
    }
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_payload(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn test_decode_integer_exp() {
        let token = token_with_payload(r#"{"sub":"u1","exp":1700000000}"#);
        assert_eq!(
            decode_expiry(&token),
            Some(TokenExpiry {
                exp_seconds: 1_700_000_000,
                expires_at_ms: 1_700_000_000_000,
            })
        );
    }

    #[test]
    fn test_decode_padded_segment() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":12}"#);
        let token = format!("h.{}.s", payload);
        assert_eq!(decode_expiry(&token).map(|e| e.exp_seconds), Some(12));
    }

    #[test]
    fn test_wrong_segment_count() {
        assert!(decode_expiry("abc.def").is_none());
        assert!(decode_expiry("a.b.c.d").is_none());
        assert!(decode_expiry("").is_none());
    }

    #[test]
    fn test_invalid_encoding_or_json() {
        assert!(decode_expiry("abc.!!!.ghi").is_none());
        assert!(decode_expiry(&token_with_payload("not json")).is_none());
        assert!(decode_expiry(&token_with_payload("[1,2,3]")).is_none());
    }

    #[test]
    fn test_missing_or_non_numeric_exp() {
        assert!(decode_expiry(&token_with_payload(r#"{"sub":"x"}"#)).is_none());
        assert!(decode_expiry(&token_with_payload(r#"{"exp":"soon"}"#)).is_none());
        assert!(decode_expiry(&token_with_payload(r#"{"exp":null}"#)).is_none());
    }

    #[test]
    fn test_scenario_token_has_no_expiry() {
        assert!(decode_expiry("abc.def.ghi").is_none());
    }
}
