//! Single-flight credential refresh.
//!
//! [`RefreshCoordinator::refresh`] trades the stored refresh token for a new
//! credential pair. At most one exchange is in flight at any time: callers
//! arriving while one is pending await the same memoized future. The
//! exchange runs as its own task, so it settles even when every waiter is
//! dropped, and it empties its slot before any waiter observes the result.
//!
//! Failure is reported as `None`, never as an error. A failed exchange
//! clears the credential store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::claims;
use crate::credentials::CredentialStore;
use crate::model::{CredentialPair, TokenPayload};
use crate::store::Secret;
use crate::subscribers::{SubscriberSet, Subscription};

/// Why a refresh exchange produced no credential pair.
///
/// Only logged; callers of [`RefreshCoordinator::refresh`] see `None`.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("refresh endpoint answered {status}")]
    Status { status: StatusCode },

    #[error("refresh response is not JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no access token in refresh response")]
    MissingAccessToken,
}

type PendingRefresh = Shared<BoxFuture<'static, Option<Secret>>>;

struct InFlight {
    id: u64,
    pending: PendingRefresh,
}

/// Empties the slot when the exchange task ends, unwinding included.
struct SlotGuard<'a> {
    inner: &'a Inner,
    id: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.inner.in_flight.lock();
        if slot.as_ref().is_some_and(|in_flight| in_flight.id == self.id) {
            slot.take();
        }
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

struct Inner {
    http: reqwest::Client,
    endpoint: Url,
    credentials: Arc<CredentialStore>,
    subscribers: SubscriberSet,
    fallback_ttl: chrono::Duration,
    in_flight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// Create a coordinator posting to `endpoint`.
    ///
    /// `fallback_ttl` is used when a refreshed access token carries no
    /// readable `exp` claim.
    pub fn new(
        http: reqwest::Client,
        endpoint: Url,
        credentials: Arc<CredentialStore>,
        fallback_ttl: chrono::Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                endpoint,
                credentials,
                subscribers: SubscriberSet::new(),
                fallback_ttl,
                in_flight: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Obtain a new access token, or `None` if that is impossible.
    ///
    /// Returns immediately without a network call when no refresh token is
    /// stored. Joins the pending exchange if one exists.
    pub async fn refresh(&self) -> Option<Secret> {
        let Some(refresh_token) = self.inner.credentials.refresh_token() else {
            tracing::debug!("No refresh token stored, skipping refresh");
            return None;
        };

        let pending = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(in_flight) => {
                    tracing::debug!("Joining in-flight credential refresh");
                    in_flight.pending.clone()
                }
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let inner = Arc::clone(&self.inner);
                    let task = tokio::spawn(async move {
                        let guard = SlotGuard { inner: &inner, id };
                        let outcome = inner.run(refresh_token).await;
                        drop(guard);
                        outcome
                    });
                    let pending = async move {
                        task.await.unwrap_or_else(|e| {
                            tracing::warn!("Credential refresh task did not complete: {}", e);
                            None
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(InFlight {
                        id,
                        pending: pending.clone(),
                    });
                    pending
                }
            }
        };

        pending.await
    }

    /// Whether an exchange is currently pending.
    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Register a callback run after every successful refresh, once the new
    /// pair is stored.
    pub fn on_credentials_refreshed<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(callback)
    }

    pub fn subscribers(&self) -> &SubscriberSet {
        &self.inner.subscribers
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.inner.credentials
    }
}

impl Inner {
    async fn run(&self, refresh_token: Secret) -> Option<Secret> {
        match self.exchange(&refresh_token).await {
            Ok(pair) => {
                let access = pair.access_token.clone();
                let expires_at = pair.access_expires_at;
                if let Err(e) = self.credentials.write(pair).await {
                    tracing::warn!("Refreshed credentials could not be persisted: {}", e);
                }
                tracing::info!(
                    "Refreshed access token, expires {}",
                    expires_at.to_rfc3339()
                );
                self.subscribers.notify();
                Some(access)
            }
            Err(e) => {
                tracing::warn!("Credential refresh failed, clearing session: {}", e);
                if let Err(e) = self.credentials.clear().await {
                    tracing::warn!("Failed to clear credentials after refresh failure: {}", e);
                }
                None
            }
        }
    }

    async fn exchange(&self, refresh_token: &Secret) -> Result<CredentialPair, RefreshError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&RefreshRequest {
                refresh: refresh_token.expose(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Status { status });
        }

        let bytes = response.bytes().await?;
        let body: serde_json::Value = serde_json::from_slice(&bytes)?;
        let payload = TokenPayload::from_body(&body).ok_or(RefreshError::MissingAccessToken)?;

        let expires_at = claims::expiry_or_fallback(payload.access.expose(), self.fallback_ttl);
        Ok(CredentialPair {
            access_token: payload.access,
            // an un-rotated refresh token stays valid
            refresh_token: payload.refresh.unwrap_or_else(|| refresh_token.clone()),
            access_expires_at: expires_at,
        })
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn coordinator(credentials: Arc<CredentialStore>) -> RefreshCoordinator {
        // Port 9 (discard) on localhost: any accidental exchange fails fast.
        RefreshCoordinator::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:9/api/users/refresh-token/").unwrap(),
            credentials,
            Duration::minutes(5),
        )
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_returns_none() {
        let credentials = Arc::new(CredentialStore::in_memory("test"));
        let coordinator = coordinator(credentials.clone());

        assert!(coordinator.refresh().await.is_none());
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_failed_exchange_clears_credentials_and_slot() {
        let credentials = Arc::new(CredentialStore::in_memory("test"));
        credentials
            .write(CredentialPair::new("a", "r", Utc::now() - Duration::minutes(1)))
            .await
            .unwrap();
        let coordinator = coordinator(credentials.clone());

        assert!(coordinator.refresh().await.is_none());
        assert!(credentials.read().is_none());
        assert!(!coordinator.is_refreshing());
    }
}
