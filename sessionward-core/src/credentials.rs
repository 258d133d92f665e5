//! The credential store: sole owner of persisted session state.
//!
//! Readers get a synchronous view of the current [`CredentialPair`] from an
//! in-memory snapshot. Writers swap the snapshot in one critical section and
//! then write the backends through, so no reader ever sees a pair whose
//! fields come from two different writes.
//!
//! Two backends are used: one for the token strings, and one (possibly less
//! durable) for the expiry instant and the user profile. After a restart a
//! missing expiry is recomputed from the access token's claim.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::claims;
use crate::model::{CredentialKind, CredentialPair};
use crate::store::{MemoryStore, Secret, SecretStore, StoreError};

pub struct CredentialStore {
    tokens: Arc<dyn SecretStore>,
    bookkeeping: Arc<dyn SecretStore>,
    namespace: String,
    snapshot: RwLock<Option<CredentialPair>>,
    user: RwLock<Option<Value>>,
    /// Serializes write-through so the backends end in the same order as the snapshot.
    persist: Mutex<()>,
}

impl CredentialStore {
    /// Create an empty store over the given backends without reading them.
    pub fn new(
        tokens: Arc<dyn SecretStore>,
        bookkeeping: Arc<dyn SecretStore>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            tokens,
            bookkeeping,
            namespace: namespace.into(),
            snapshot: RwLock::new(None),
            user: RwLock::new(None),
            persist: Mutex::new(()),
        }
    }

    /// A store backed by two [`MemoryStore`]s.
    pub fn in_memory(namespace: impl Into<String>) -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            namespace,
        )
    }

    /// Create a store and hydrate it from whatever the backends hold.
    ///
    /// A session missing either token is treated as logged out. A missing or
    /// unparseable expiry is recomputed from the access token's `exp` claim;
    /// if that fails too the pair is kept but reported expired.
    pub async fn load(
        tokens: Arc<dyn SecretStore>,
        bookkeeping: Arc<dyn SecretStore>,
        namespace: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let store = Self::new(tokens, bookkeeping, namespace);

        let access = store.tokens.get(&store.key(CredentialKind::AccessToken)).await?;
        let refresh = store.tokens.get(&store.key(CredentialKind::RefreshToken)).await?;

        let pair = match (access, refresh) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                let expires_at = match store.stored_expiry().await? {
                    Some(expires_at) => expires_at,
                    None => claims::decode_expiry(access.expose()).unwrap_or_else(|e| {
                        tracing::debug!("No usable expiry for stored access token: {}", e);
                        DateTime::<Utc>::MIN_UTC
                    }),
                };
                Some(CredentialPair {
                    access_token: access,
                    refresh_token: refresh,
                    access_expires_at: expires_at,
                })
            }
            (None, None) => None,
            _ => {
                tracing::debug!("Ignoring partially persisted session for {}", store.namespace);
                None
            }
        };

        let user = match store.bookkeeping.get(&store.key(CredentialKind::UserProfile)).await? {
            Some(raw) => serde_json::from_str::<Value>(raw.expose())
                .ok()
                .filter(Value::is_object),
            None => None,
        };

        if let Some(pair) = &pair {
            tracing::info!(
                "Restored session for {} (access expires {})",
                store.namespace,
                pair.access_expires_at.to_rfc3339()
            );
        }

        *store.snapshot.write() = pair;
        *store.user.write() = user;
        Ok(store)
    }

    /// Storage namespace, e.g. `sessionward`.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Current credential pair, if any. Never fails.
    pub fn read(&self) -> Option<CredentialPair> {
        self.snapshot.read().clone()
    }

    pub fn access_token(&self) -> Option<Secret> {
        self.snapshot.read().as_ref().map(|p| p.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<Secret> {
        self.snapshot.read().as_ref().map(|p| p.refresh_token.clone())
    }

    /// True if no pair exists, or if `now + leeway >= access_expires_at`.
    pub fn is_expired(&self, leeway: Duration) -> bool {
        match self.snapshot.read().as_ref() {
            Some(pair) => pair.expires_within(leeway),
            None => true,
        }
    }

    /// Stored user profile, if a login recorded one.
    pub fn user(&self) -> Option<Value> {
        self.user.read().clone()
    }

    /// Replace the credential pair wholesale.
    ///
    /// The new pair is visible to [`read`](Self::read) before this returns,
    /// even if persisting it fails.
    pub async fn write(&self, pair: CredentialPair) -> Result<(), StoreError> {
        let _guard = self.persist.lock().await;

        let access = pair.access_token.clone();
        let refresh = pair.refresh_token.clone();
        let expires_at = Secret::new(pair.access_expires_at.timestamp_millis().to_string());
        *self.snapshot.write() = Some(pair);

        if let Err(e) = self.persist_pair(&access, &refresh, &expires_at).await {
            tracing::warn!(
                "Failed to persist credential pair for {}, removing stored tokens: {}",
                self.namespace,
                e
            );
            self.forget_pair().await;
            return Err(e);
        }

        tracing::debug!("Stored credential pair for {}", self.namespace);
        Ok(())
    }

    async fn persist_pair(
        &self,
        access: &Secret,
        refresh: &Secret,
        expires_at: &Secret,
    ) -> Result<(), StoreError> {
        self.tokens
            .set(&self.key(CredentialKind::AccessToken), access)
            .await?;
        self.tokens
            .set(&self.key(CredentialKind::RefreshToken), refresh)
            .await?;
        self.bookkeeping
            .set(&self.key(CredentialKind::AccessExpiresAt), expires_at)
            .await
    }

    /// Best-effort removal of a partially persisted pair, so a reload finds
    /// no session rather than a mismatched one.
    async fn forget_pair(&self) {
        for (store, kind) in [
            (&self.tokens, CredentialKind::AccessToken),
            (&self.tokens, CredentialKind::RefreshToken),
            (&self.bookkeeping, CredentialKind::AccessExpiresAt),
        ] {
            if let Err(e) = store.delete(&self.key(kind)).await {
                tracing::debug!("Could not remove {}: {}", self.key(kind), e);
            }
        }
    }

    /// Record the profile returned at login.
    pub async fn write_user(&self, user: Value) -> Result<(), StoreError> {
        let _guard = self.persist.lock().await;

        let raw = Secret::new(serde_json::to_string(&user)?);
        *self.user.write() = Some(user);
        self.bookkeeping
            .set(&self.key(CredentialKind::UserProfile), &raw)
            .await
    }

    /// Remove every persisted field. Idempotent.
    ///
    /// All deletes are attempted; the first backend error is returned.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.persist.lock().await;

        *self.snapshot.write() = None;
        *self.user.write() = None;

        let mut first_error = None;
        let deletes = [
            (&self.tokens, CredentialKind::AccessToken),
            (&self.tokens, CredentialKind::RefreshToken),
            (&self.bookkeeping, CredentialKind::AccessExpiresAt),
            (&self.bookkeeping, CredentialKind::UserProfile),
        ];
        for (backend, kind) in deletes {
            if let Err(e) = backend.delete(&self.key(kind)).await {
                tracing::warn!("Failed to delete {} for {}: {}", kind, self.namespace, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn key(&self, kind: CredentialKind) -> String {
        kind.storage_key(&self.namespace)
    }

    async fn stored_expiry(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let raw = self
            .bookkeeping
            .get(&self.key(CredentialKind::AccessExpiresAt))
            .await?;
        Ok(raw
            .and_then(|s| s.expose().trim().parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis))
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("namespace", &self.namespace)
            .field("pair", &self.snapshot.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;

    fn backends() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        (Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_empty_store_is_expired() {
        let store = CredentialStore::in_memory("test");
        assert!(store.read().is_none());
        assert!(store.is_expired(Duration::zero()));
        assert!(store.access_token().is_none());
    }

    #[tokio::test]
    async fn test_write_then_read_same_turn() {
        let store = CredentialStore::in_memory("test");
        let expires = Utc::now() + Duration::hours(1);
        store
            .write(CredentialPair::new("access-1", "refresh-1", expires))
            .await
            .unwrap();

        let pair = store.read().unwrap();
        assert_eq!(pair.access_token.expose(), "access-1");
        assert_eq!(pair.refresh_token.expose(), "refresh-1");
        assert!(!store.is_expired(Duration::seconds(30)));
        assert!(store.is_expired(Duration::hours(2)));
    }

    #[tokio::test]
    async fn test_clear_removes_everything_and_is_idempotent() {
        let (tokens, bookkeeping) = backends();
        let store = CredentialStore::new(tokens.clone(), bookkeeping.clone(), "test");
        store
            .write(CredentialPair::new("a", "r", Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        store.write_user(json!({"id": 1})).await.unwrap();

        store.clear().await.unwrap();
        store.clear().await.unwrap();

        assert!(store.read().is_none());
        assert!(store.user().is_none());
        assert!(tokens.is_empty());
        assert!(bookkeeping.is_empty());
    }

    #[tokio::test]
    async fn test_load_restores_persisted_pair() {
        let (tokens, bookkeeping) = backends();
        let expires = Utc::now() + Duration::minutes(10);
        {
            let store = CredentialStore::new(tokens.clone(), bookkeeping.clone(), "test");
            store
                .write(CredentialPair::new("a", "r", expires))
                .await
                .unwrap();
            store.write_user(json!({"email": "s@example.com"})).await.unwrap();
        }

        let reloaded = CredentialStore::load(tokens, bookkeeping, "test").await.unwrap();
        let pair = reloaded.read().unwrap();
        assert_eq!(pair.access_token.expose(), "a");
        assert_eq!(
            pair.access_expires_at.timestamp_millis(),
            expires.timestamp_millis()
        );
        assert_eq!(reloaded.user().unwrap()["email"], "s@example.com");
    }

    #[tokio::test]
    async fn test_load_recomputes_expiry_from_claim() {
        let exp = Utc::now().timestamp() + 600;
        let access = format!(
            "h.{}.s",
            URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, exp))
        );
        let tokens = Arc::new(MemoryStore::with_entries([
            ("test/access_token", access.as_str()),
            ("test/refresh_token", "r"),
        ]));
        let bookkeeping = Arc::new(MemoryStore::new());

        let store = CredentialStore::load(tokens, bookkeeping, "test").await.unwrap();
        assert_eq!(store.read().unwrap().access_expires_at.timestamp(), exp);
        assert!(!store.is_expired(Duration::seconds(30)));
    }

    #[tokio::test]
    async fn test_load_without_claim_or_expiry_reports_expired() {
        let tokens = Arc::new(MemoryStore::with_entries([
            ("test/access_token", "opaque"),
            ("test/refresh_token", "r"),
        ]));
        let bookkeeping = Arc::new(MemoryStore::with_entries([(
            "test/access_expires_at",
            "garbage",
        )]));

        let store = CredentialStore::load(tokens, bookkeeping, "test").await.unwrap();
        assert!(store.read().is_some());
        assert!(store.is_expired(Duration::zero()));
    }

    #[tokio::test]
    async fn test_load_ignores_partial_session() {
        let tokens = Arc::new(MemoryStore::with_entries([("test/access_token", "a")]));
        let store = CredentialStore::load(tokens, Arc::new(MemoryStore::new()), "test")
            .await
            .unwrap();
        assert!(store.read().is_none());
    }

    /// Delegates to a [`MemoryStore`] but refuses every write.
    struct ReadOnlyStore(MemoryStore);

    #[async_trait::async_trait]
    impl SecretStore for ReadOnlyStore {
        async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
            self.0.get(key).await
        }

        async fn set(&self, _key: &str, _secret: &Secret) -> Result<(), StoreError> {
            Err(StoreError::BackendError {
                message: "read-only".to_string(),
            })
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.0.delete(key).await
        }

        async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.0.list_keys(prefix).await
        }
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_no_mismatched_pair() {
        let old_expiry = (Utc::now() + Duration::hours(1)).timestamp_millis().to_string();
        let tokens = Arc::new(MemoryStore::with_entries([
            ("test/access_token", "a-old"),
            ("test/refresh_token", "r-old"),
        ]));
        let bookkeeping = Arc::new(ReadOnlyStore(MemoryStore::with_entries([(
            "test/access_expires_at",
            old_expiry.as_str(),
        )])));

        let store = CredentialStore::load(tokens.clone(), bookkeeping.clone(), "test")
            .await
            .unwrap();
        assert_eq!(store.access_token().unwrap().expose(), "a-old");

        let err = store
            .write(CredentialPair::new(
                "a-new",
                "r-new",
                Utc::now() + Duration::hours(2),
            ))
            .await;
        assert!(matches!(err, Err(StoreError::BackendError { .. })));
        // the running process keeps the new pair
        assert_eq!(store.access_token().unwrap().expose(), "a-new");

        let reloaded = CredentialStore::load(tokens, bookkeeping, "test").await.unwrap();
        assert!(reloaded.read().is_none());
    }
}
