//! Key-value storage backends for credential material.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for storage backends
//! - [`MemoryStore`] - In-memory implementation for tests and ephemeral sessions
//! - [`FileStore`] - JSON file in the data directory, survives restarts
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select a backend based on availability
//!
//! # Storage Key Convention
//!
//! Keys follow the pattern: `{namespace}/{credential_kind}`, e.g.
//! `sessionward/access_token`.
//!
//! # Example
//!
//! ```rust,ignore
//! use sessionward_core::store::{Secret, SecretStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.set("sessionward/access_token", &Secret::new("eyJ...")).await?;
//!
//! let retrieved = store.get("sessionward/access_token").await?;
//! assert_eq!(retrieved.unwrap().expose(), "eyJ...");
//! ```

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is wiped when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }

    /// Whether the secret holds an empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Abstraction over key-value storage backends.
///
/// Implementations include:
/// - [`MemoryStore`] - In-memory storage
/// - [`FileStore`] - JSON file storage
/// - [`KeyringStore`] (with `keyring-store` feature) - OS keyring
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a secret at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Delete a secret by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List all keys matching a prefix.
    ///
    /// Returns an empty vec if no keys match.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Create a token store with automatic backend selection.
///
/// # Backend Selection Logic
///
/// - If `prefer_keyring` is `true` and the `keyring-store` feature is enabled,
///   attempts to create a [`KeyringStore`] scoped to `namespace`.
/// - Otherwise (or if the keyring is unavailable) opens a [`FileStore`] at
///   `fallback_path`.
/// - If the file cannot be opened either, returns a [`MemoryStore`]; the
///   session then lasts only as long as the process.
pub fn create_store(
    prefer_keyring: bool,
    namespace: &str,
    fallback_path: &Path,
) -> Arc<dyn SecretStore> {
    #[cfg(feature = "keyring-store")]
    if prefer_keyring {
        match KeyringStore::try_new(namespace) {
            Ok(store) => {
                tracing::info!("Using OS keyring for token storage");
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!(
                    "Keyring unavailable ({}), falling back to file store at {}",
                    e,
                    fallback_path.display()
                );
            }
        }
    }

    #[cfg(not(feature = "keyring-store"))]
    if prefer_keyring {
        tracing::warn!(
            "Keyring storage requested for namespace {} but keyring-store feature not enabled",
            namespace
        );
    }

    match FileStore::open_or_reset(fallback_path) {
        Ok(store) => {
            tracing::debug!("Using file token storage at {}", fallback_path.display());
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                "File store unavailable ({}), using memory store. \
                 The session will not survive a restart.",
                e
            );
            Arc::new(MemoryStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::new("super-secret");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_secret_display_redacted() {
        let secret = Secret::new("super-secret");
        let display = format!("{}", secret);
        assert!(!display.contains("super-secret"));
        assert!(display.contains("REDACTED"));
    }

    #[test]
    fn test_secret_into_inner() {
        let secret = Secret::new("value");
        assert_eq!(secret.into_inner(), "value");
    }

    #[tokio::test]
    async fn test_create_store_file_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = create_store(false, "sessionward-test", &path);

        store.set("sessionward-test/k", &Secret::new("v")).await.unwrap();
        let retrieved = store.get("sessionward-test/k").await.unwrap();
        assert_eq!(retrieved.unwrap().expose(), "v");
        assert!(path.exists());
    }
}
