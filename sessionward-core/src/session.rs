//! Session lifecycle: the entry points that create and destroy the credential
//! pair around the request pipeline.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::claims;
use crate::config::{ConfigError, PipelineConfig};
use crate::credentials::CredentialStore;
use crate::error::SessionwardError;
use crate::model::{CredentialPair, TokenPayload};
use crate::pipeline::AuthClient;
use crate::request::{ApiError, ApiRequest};
use crate::store::{FileStore, Secret, create_store};
use crate::termination::Navigator;

#[derive(Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

/// A signed-in (or signed-out) user session.
#[derive(Debug, Clone)]
pub struct Session {
    client: AuthClient,
    login_endpoint: String,
    login_fallback_ttl: chrono::Duration,
}

impl Session {
    pub fn new(
        config: &PipelineConfig,
        credentials: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            client: AuthClient::new(config, credentials, navigator)?,
            login_endpoint: config.login_endpoint.clone(),
            login_fallback_ttl: config.login_fallback_ttl(),
        })
    }

    /// Open the persisted session described by `config`.
    ///
    /// Tokens go to the OS keyring when `prefer_keyring` is set and one is
    /// available, otherwise to a file in the data directory. Expiry and
    /// profile always live in the session file.
    pub async fn open(
        config: &PipelineConfig,
        prefer_keyring: bool,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, SessionwardError> {
        let namespace = config.storage_namespace.as_str();
        let tokens = create_store(prefer_keyring, namespace, &config.token_file());
        let bookkeeping = Arc::new(FileStore::open_or_reset(config.session_file())?);
        let credentials = CredentialStore::load(tokens, bookkeeping, namespace).await?;
        Ok(Self::new(config, Arc::new(credentials), navigator)?)
    }

    pub fn client(&self) -> &AuthClient {
        &self.client
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        self.client.credentials()
    }

    /// Sign in with an identifier (email or username) and password.
    ///
    /// Stores the returned credential pair and profile, and returns the
    /// profile if the backend sent one.
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Option<Value>, SessionwardError> {
        let body = serde_json::to_value(LoginRequest {
            identifier,
            password,
        })
        .map_err(ApiError::from)?;
        let response = self
            .client
            .send(ApiRequest::post(self.login_endpoint.as_str()).json(body))
            .await?;
        let body: Value = response.json()?;

        let payload = TokenPayload::from_body(&body)
            .ok_or(SessionwardError::IncompleteLogin { missing: "access" })?;
        let refresh = payload
            .refresh
            .ok_or(SessionwardError::IncompleteLogin { missing: "refresh" })?;
        let user = TokenPayload::root(&body)
            .get("user")
            .filter(|u| u.is_object())
            .cloned();

        self.store_tokens(payload.access, refresh, user.clone())
            .await?;
        tracing::info!("Logged in as {}", identifier);
        Ok(user)
    }

    /// Store a credential pair obtained outside [`login`](Self::login), e.g.
    /// from an account verification response.
    pub async fn store_tokens(
        &self,
        access: Secret,
        refresh: Secret,
        user: Option<Value>,
    ) -> Result<(), SessionwardError> {
        let expires_at = claims::expiry_or_fallback(access.expose(), self.login_fallback_ttl);
        let credentials = self.credentials();
        credentials
            .write(CredentialPair {
                access_token: access,
                refresh_token: refresh,
                access_expires_at: expires_at,
            })
            .await?;
        if let Some(user) = user {
            credentials.write_user(user).await?;
        }
        Ok(())
    }

    /// Forget the credential pair and profile. No redirect happens.
    pub async fn logout(&self) -> Result<(), SessionwardError> {
        self.credentials().clear().await?;
        tracing::info!("Logged out of {}", self.credentials().namespace());
        Ok(())
    }

    /// An access token exists and has not yet expired.
    pub fn is_authenticated(&self) -> bool {
        self.credentials().access_token().is_some()
            && !self.credentials().is_expired(chrono::Duration::zero())
    }

    pub fn current_user(&self) -> Option<Value> {
        self.credentials().user()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::termination::LogNavigator;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn session() -> Session {
        Session::new(
            &PipelineConfig::with_base_url("http://127.0.0.1:9/api/"),
            Arc::new(CredentialStore::in_memory("test")),
            Arc::new(LogNavigator),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_store_tokens_and_logout() {
        let session = session();
        assert!(!session.is_authenticated());

        session
            .store_tokens(
                Secret::new("opaque-access"),
                Secret::new("opaque-refresh"),
                Some(json!({"id": 7, "email": "ada@example.com"})),
            )
            .await
            .unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.current_user().unwrap()["id"], 7);

        // no exp claim: the login TTL applies
        let pair = session.credentials().read().unwrap();
        assert!(pair.access_expires_at > Utc::now() + Duration::hours(23));

        session.logout().await.unwrap();
        assert!(!session.is_authenticated());
        assert!(session.current_user().is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_not_authenticated() {
        let session = session();
        session
            .credentials()
            .write(CredentialPair::new(
                "a",
                "r",
                Utc::now() - Duration::seconds(1),
            ))
            .await
            .unwrap();
        assert!(!session.is_authenticated());
    }
}
