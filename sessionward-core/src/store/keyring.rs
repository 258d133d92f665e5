//! OS keyring-backed storage for the token strings.

use async_trait::async_trait;
use keyring::Entry;

use super::{Secret, SecretStore, StoreError};

/// OS keyring-backed store.
///
/// Uses the platform's native keyring service (Keychain, Secret Service,
/// Credential Manager). Each key becomes one keyring entry whose service
/// is the namespace and whose user is the key.
pub struct KeyringStore {
    namespace: String,
}

impl KeyringStore {
    /// Try to create a keyring store for `namespace`.
    ///
    /// Returns an error if the keyring backend is not available on this
    /// platform, or refuses a test read.
    pub fn try_new(namespace: &str) -> Result<Self, StoreError> {
        let check = Entry::new(namespace, "__availability_check__").map_err(|e| {
            StoreError::KeyringUnavailable {
                message: e.to_string(),
            }
        })?;
        match check.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(Self {
                namespace: namespace.to_string(),
            }),
            Err(e) => Err(StoreError::KeyringUnavailable {
                message: e.to_string(),
            }),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.namespace, key).map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry for {}: {}", key, e),
        })
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(password) => Ok(Some(Secret::new(password))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring read failed for {}: {}", key, e),
            }),
        }
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(secret.expose())
            .map_err(|e| StoreError::BackendError {
                message: format!("keyring write failed for {}: {}", key, e),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring delete failed for {}: {}", key, e),
            }),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // Platform keyrings have no enumeration API.
        Err(StoreError::BackendError {
            message: format!("list_keys not supported by keyring backend (prefix: {})", prefix),
        })
    }
}
