//! # Sessionward Core
//!
//! Authenticated request pipeline and credential lifecycle for a REST backend
//! issuing short-lived access tokens and longer-lived refresh tokens.
//!
//! This crate provides:
//! - A credential store with an atomically swapped in-memory view over
//!   pluggable secret storage (memory, file, OS keyring)
//! - A classifier deciding which endpoints must never receive credentials
//! - A single-flight refresh coordinator with refresh notifications
//! - A request pipeline that attaches, refreshes and retries once
//! - Session termination through an injected navigator
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sessionward_core::{load_config, LogNavigator, Session};
//!
//! async fn enrollments() -> Result<serde_json::Value, sessionward_core::SessionwardError> {
//!     let config = load_config()?;
//!     let session = Session::open(&config, true, Arc::new(LogNavigator)).await?;
//!     let body = session.client().get_json("enrollments/my-enrollments/").await?;
//!     Ok(body)
//! }
//! ```

pub mod claims;
pub mod classify;
pub mod config;
pub mod credentials;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod refresh;
pub mod request;
pub mod session;
pub mod store;
pub mod subscribers;
pub mod termination;

// Re-export commonly used types at crate root
pub use model::{
    CredentialKind,
    CredentialPair,
    TokenPayload,
};

pub use store::{
    Secret,
    SecretStore,
    StoreError,
    MemoryStore,
    FileStore,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use claims::{
    ClaimsError,
    decode_expiry,
    expiry_or_fallback,
};

pub use classify::EndpointClassifier;

pub use config::{
    ConfigError,
    PipelineConfig,
    load_config,
    load_config_from,
};

pub use credentials::CredentialStore;

pub use refresh::{
    RefreshCoordinator,
    RefreshError,
};

pub use subscribers::{
    SubscriberSet,
    Subscription,
};

pub use request::{
    ApiError,
    ApiRequest,
    ApiResponse,
    ErrorResponse,
    Method,
    RequestAttempt,
};

pub use pipeline::AuthClient;

pub use termination::{
    LogNavigator,
    Navigator,
    SessionTerminator,
};

pub use session::Session;

pub use error::SessionwardError;
