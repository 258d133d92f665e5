//! Request, attempt and response values passed through the pipeline, and the
//! pipeline's error taxonomy.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
pub use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Backend error code meaning the presented credential is invalid.
pub const INVALID_CREDENTIAL_CODE: &str = "token_not_valid";

/// A request as the caller describes it.
///
/// Bodies are JSON values, so a request can always be cloned and re-sent.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    target: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Value>,
}

impl ApiRequest {
    /// `target` is a path relative to the configured base, or an absolute URL.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::PUT, target)
    }

    pub fn patch(target: impl Into<String>) -> Self {
        Self::new(Method::PATCH, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }
}

/// One dispatch of an [`ApiRequest`].
///
/// The attempt number replaces a mutable "already retried" flag: the first
/// dispatch is attempt 0, and [`retry`](Self::retry) builds attempt 1.
/// Only attempt 0 is eligible for an authentication retry.
#[derive(Debug, Clone)]
pub struct RequestAttempt {
    request: ApiRequest,
    attempt: u8,
}

impl RequestAttempt {
    pub fn first(request: ApiRequest) -> Self {
        Self {
            request,
            attempt: 0,
        }
    }

    /// The next attempt of the same request.
    pub fn retry(&self) -> Self {
        Self {
            request: self.request.clone(),
            attempt: self.attempt.saturating_add(1),
        }
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 0
    }

    pub fn attempt(&self) -> u8 {
        self.attempt
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }
}

/// A fully buffered 2xx response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Details of a non-2xx response.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub status: StatusCode,
    /// Top-level `code` of a JSON error body, if any.
    pub code: Option<String>,
    pub body: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, body: &[u8]) -> Self {
        let code = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| v.get("code").and_then(Value::as_str).map(str::to_string));
        Self {
            status,
            code,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    /// 401, or a body carrying the invalid-credential code.
    pub fn is_auth_rejection(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
            || self.code.as_deref() == Some(INVALID_CREDENTIAL_CODE)
    }
}

/// Outcome of a request that did not produce a 2xx response.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable credential existed for a protected request; it was not sent
    /// and the session was terminated.
    #[error("authentication required")]
    AuthRequired,

    /// The backend rejected the credential and it could not be refreshed.
    /// The session was terminated.
    #[error("request rejected for authentication reasons ({})", .0.status)]
    AuthRejected(ErrorResponse),

    /// The request was rejected again after a refresh and one retry.
    /// The session was terminated.
    #[error("request rejected again after credential refresh ({})", .0.status)]
    RetryExhausted(ErrorResponse),

    /// Any other non-2xx response, passed through untouched.
    #[error("request failed with status {}", .0.status)]
    Http(ErrorResponse),

    /// The transport failed (connect, timeout, body read).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid request target {target:?}: {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// The HTTP response behind this error, if one was received.
    pub fn response(&self) -> Option<&ErrorResponse> {
        match self {
            Self::AuthRejected(r) | Self::RetryExhausted(r) | Self::Http(r) => Some(r),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(|r| r.status)
    }

    /// Whether the session was terminated because of this error.
    pub fn ended_session(&self) -> bool {
        matches!(
            self,
            Self::AuthRequired | Self::AuthRejected(_) | Self::RetryExhausted(_)
        )
    }
}
