//! Domain model types for sessionward.
//!
//! - [`CredentialKind`] - The persisted pieces of a session and their storage keys
//! - [`CredentialPair`] - Access token, refresh token and access expiry, always together
//! - [`TokenPayload`] - Tokens extracted from a login or refresh response body

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::store::Secret;

/// One persisted piece of session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Short-lived bearer credential.
    AccessToken,

    /// Long-lived credential used only against the refresh endpoint.
    RefreshToken,

    /// Instant the access token stops being usable, in epoch milliseconds.
    AccessExpiresAt,

    /// JSON profile returned by the login endpoint.
    UserProfile,
}

impl CredentialKind {
    /// Get the kind as a string for storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::AccessExpiresAt => "access_expires_at",
            Self::UserProfile => "user",
        }
    }

    /// Storage key for this kind under `namespace`.
    ///
    /// ```
    /// use sessionward_core::CredentialKind;
    ///
    /// assert_eq!(
    ///     CredentialKind::AccessToken.storage_key("lms"),
    ///     "lms/access_token"
    /// );
    /// ```
    pub fn storage_key(&self, namespace: &str) -> String {
        format!("{}/{}", namespace, self.as_str())
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The credential triple owned by the
/// [`CredentialStore`](crate::credentials::CredentialStore).
///
/// `access_expires_at` is derived from the access token's `exp` claim, or
/// from a fallback time-to-live when the claim cannot be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: Secret,
    pub refresh_token: Secret,
    pub access_expires_at: DateTime<Utc>,
}

impl CredentialPair {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        access_expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: Secret::new(refresh_token),
            access_expires_at,
        }
    }

    /// True if `now + leeway >= access_expires_at`.
    pub fn expires_within(&self, leeway: Duration) -> bool {
        Utc::now()
            .checked_add_signed(leeway)
            .is_none_or(|deadline| deadline >= self.access_expires_at)
    }
}

/// Tokens found in a login or refresh response body.
///
/// The canonical contract is `{"data": {"access": ..., "refresh": ...}}`.
/// For compatibility the tokens may also sit under a `tokens` object, and the
/// `data` envelope may be missing.
#[derive(Debug, Clone)]
pub struct TokenPayload {
    pub access: Secret,
    /// Absent when the backend did not rotate the refresh token.
    pub refresh: Option<Secret>,
}

impl TokenPayload {
    /// Extract tokens from a response body.
    ///
    /// Returns `None` when no non-empty access token can be found.
    pub fn from_body(body: &Value) -> Option<Self> {
        let root = Self::root(body);
        let access = Self::field(root, "access")?;
        let refresh = Self::field(root, "refresh");
        Some(Self { access, refresh })
    }

    /// The object the payload lives in: `data` when present, else the body.
    pub fn root(body: &Value) -> &Value {
        match body.get("data") {
            Some(data) if !data.is_null() => data,
            _ => body,
        }
    }

    fn field(root: &Value, name: &str) -> Option<Secret> {
        let nested = root.get("tokens").and_then(|t| t.get(name));
        nested
            .or_else(|| root.get(name))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(Secret::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_storage_keys() {
        assert_eq!(
            CredentialKind::RefreshToken.storage_key("sessionward"),
            "sessionward/refresh_token"
        );
        assert_eq!(
            CredentialKind::AccessExpiresAt.storage_key("sessionward"),
            "sessionward/access_expires_at"
        );
        assert_eq!(CredentialKind::UserProfile.to_string(), "user");
    }

    #[test]
    fn test_pair_expires_within() {
        let pair = CredentialPair::new("a", "r", Utc::now() + Duration::seconds(10));
        assert!(pair.expires_within(Duration::seconds(30)));
        assert!(!pair.expires_within(Duration::seconds(0)));
        assert!(pair.expires_within(Duration::MAX));
    }

    #[test]
    fn test_payload_canonical_shape() {
        let body = json!({"data": {"access": "a1", "refresh": "r1"}});
        let payload = TokenPayload::from_body(&body).unwrap();
        assert_eq!(payload.access.expose(), "a1");
        assert_eq!(payload.refresh.unwrap().expose(), "r1");
    }

    #[test]
    fn test_payload_nested_tokens_shape() {
        let body = json!({"data": {"tokens": {"access": "a2", "refresh": "r2"}, "user": {}}});
        let payload = TokenPayload::from_body(&body).unwrap();
        assert_eq!(payload.access.expose(), "a2");
        assert_eq!(payload.refresh.unwrap().expose(), "r2");

        let flat = json!({"tokens": {"access": "a3"}});
        let payload = TokenPayload::from_body(&flat).unwrap();
        assert_eq!(payload.access.expose(), "a3");
        assert!(payload.refresh.is_none());
    }

    #[test]
    fn test_payload_requires_access() {
        assert!(TokenPayload::from_body(&json!({"data": {"refresh": "r"}})).is_none());
        assert!(TokenPayload::from_body(&json!({"access": ""})).is_none());
        assert!(TokenPayload::from_body(&json!({"data": null, "access": 5})).is_none());
        assert!(TokenPayload::from_body(&json!("nope")).is_none());
    }
}
