//! Top-level error type for sessionward.

use thiserror::Error;

use crate::claims::ClaimsError;
use crate::config::ConfigError;
use crate::request::ApiError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SessionwardError {
    /// Error from a storage backend.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error decoding access token claims.
    #[error("claims error: {0}")]
    Claims(#[from] ClaimsError),

    /// Error from the request pipeline.
    #[error("request error: {0}")]
    Api(#[from] ApiError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The login endpoint answered 2xx without a usable credential pair.
    #[error("login response carried no {missing} token")]
    IncompleteLogin { missing: &'static str },
}

impl SessionwardError {
    /// Whether this error means the user must sign in again.
    pub fn requires_sign_in(&self) -> bool {
        match self {
            Self::Api(e) => e.ended_session(),
            _ => false,
        }
    }
}
