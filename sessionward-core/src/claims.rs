//! Access-token claim decoding.
//!
//! Only the `exp` claim is read, and the signature is not checked: the
//! backend issues and validates tokens, this side only needs to know when to
//! stop using one.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Error type for claim decoding.
#[derive(Debug, Error)]
pub enum ClaimsError {
    /// The token is not a three-part JWT.
    #[error("malformed token: {message}")]
    Malformed { message: String },

    /// The payload segment is not valid base64url.
    #[error("invalid payload encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// The payload is not a JSON object.
    #[error("invalid payload JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload has no numeric `exp` claim.
    #[error("token has no exp claim")]
    MissingExpiry,

    /// `exp` cannot be represented as an instant.
    #[error("exp claim out of range: {exp}")]
    OutOfRange { exp: f64 },
}

#[derive(Deserialize)]
struct ExpiryClaim {
    #[serde(default)]
    exp: Option<serde_json::Value>,
}

/// Decode the expiry instant embedded in a JWT access token.
pub fn decode_expiry(token: &str) -> Result<DateTime<Utc>, ClaimsError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => {
            return Err(ClaimsError::Malformed {
                message: "expected header.payload.signature".to_string(),
            });
        }
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    let claims: ExpiryClaim = serde_json::from_slice(&bytes)?;

    // `exp` is seconds since the epoch; fractional values are tolerated.
    let exp = claims
        .exp
        .as_ref()
        .and_then(serde_json::Value::as_f64)
        .ok_or(ClaimsError::MissingExpiry)?;

    let millis = (exp * 1000.0).round();
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
        return Err(ClaimsError::OutOfRange { exp });
    }
    DateTime::from_timestamp_millis(millis as i64).ok_or(ClaimsError::OutOfRange { exp })
}

/// Expiry from the token's claim, or `now + fallback_ttl` when it cannot be read.
///
/// A fallback past the representable range saturates at
/// [`DateTime::<Utc>::MAX_UTC`].
pub fn expiry_or_fallback(token: &str, fallback_ttl: Duration) -> DateTime<Utc> {
    match decode_expiry(token) {
        Ok(expires_at) => expires_at,
        Err(e) => {
            tracing::debug!("Using fallback TTL for access token expiry: {}", e);
            Utc::now()
                .checked_add_signed(fallback_ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn test_decode_expiry_reads_exp_seconds() {
        let token = jwt(r#"{"exp":1700000000,"user_id":7}"#);
        let expires_at = decode_expiry(&token).unwrap();
        assert_eq!(expires_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_decode_expiry_tolerates_padding_and_fractions() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":1700000000.5}"#);
        let token = format!("h.{}.s", payload);
        let expires_at = decode_expiry(&token).unwrap();
        assert_eq!(expires_at.timestamp_millis(), 1_700_000_000_500);
    }

    #[test]
    fn test_decode_expiry_errors() {
        assert!(matches!(
            decode_expiry("opaque-token"),
            Err(ClaimsError::Malformed { .. })
        ));
        assert!(matches!(
            decode_expiry("a.b.c.d"),
            Err(ClaimsError::Malformed { .. })
        ));
        assert!(matches!(
            decode_expiry("h.!!!.s"),
            Err(ClaimsError::Encoding(_))
        ));
        assert!(matches!(
            decode_expiry(&jwt(r#"{"sub":"1"}"#)),
            Err(ClaimsError::MissingExpiry)
        ));
        assert!(matches!(
            decode_expiry(&jwt(r#"{"exp":"soon"}"#)),
            Err(ClaimsError::MissingExpiry)
        ));
        assert!(matches!(
            decode_expiry(&jwt(r#""text""#)),
            Err(ClaimsError::Json(_))
        ));
    }

    #[test]
    fn test_expiry_or_fallback() {
        let before = Utc::now();
        let expires_at = expiry_or_fallback("opaque", Duration::minutes(5));
        assert!(expires_at >= before + Duration::minutes(5));
        assert!(expires_at <= Utc::now() + Duration::minutes(5));

        let token = jwt(r#"{"exp":1700000000}"#);
        assert_eq!(
            expiry_or_fallback(&token, Duration::minutes(5)).timestamp(),
            1_700_000_000
        );
    }

    #[test]
    fn test_fallback_saturates_instead_of_overflowing() {
        assert_eq!(
            expiry_or_fallback("opaque", Duration::MAX),
            DateTime::<Utc>::MAX_UTC
        );
    }
}
