//! The authenticated request pipeline.
//!
//! Every request passes through an outbound hook before it is sent and an
//! inbound hook once its outcome is known.
//!
//! Outbound: public targets go out bare. Protected targets get a bearer
//! credential, refreshed first when it is within the leeway of expiring; if
//! none can be obtained the request is not sent and the session ends.
//!
//! Inbound: an authentication rejection of a protected first attempt
//! triggers one refresh and one retry of the same request. A second
//! rejection, or a failed refresh, ends the session. Everything else passes
//! through untouched.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::classify::EndpointClassifier;
use crate::config::{ConfigError, PipelineConfig};
use crate::credentials::CredentialStore;
use crate::refresh::RefreshCoordinator;
use crate::request::{ApiError, ApiRequest, ApiResponse, ErrorResponse, RequestAttempt};
use crate::store::Secret;
use crate::subscribers::Subscription;
use crate::termination::{Navigator, SessionTerminator};

/// What the inbound hook decided.
enum Inbound {
    Done(Result<ApiResponse, ApiError>),
    Retry(Secret),
}

/// HTTP client running every request through the authentication hooks.
#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    classifier: Arc<EndpointClassifier>,
    credentials: Arc<CredentialStore>,
    refresher: RefreshCoordinator,
    terminator: SessionTerminator,
    leeway: chrono::Duration,
}

impl AuthClient {
    /// Build the pipeline from configuration.
    pub fn new(
        config: &PipelineConfig,
        credentials: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let http = config.http_client()?;
        let classifier = EndpointClassifier::new(config.base()?, config.public_fragments());
        let refresher = RefreshCoordinator::new(
            http.clone(),
            config.refresh_url()?,
            Arc::clone(&credentials),
            config.fallback_ttl(),
        );
        let terminator =
            SessionTerminator::new(Arc::clone(&credentials), navigator, &config.sign_in_path);

        Ok(Self {
            http,
            classifier: Arc::new(classifier),
            credentials,
            refresher,
            terminator,
            leeway: config.leeway(),
        })
    }

    /// Send `request` through both hooks.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut attempt = RequestAttempt::first(request);
        let mut credential = self.outbound(&attempt).await?;

        loop {
            let outcome = self.execute(&attempt, credential.as_ref()).await;
            match self.inbound(&attempt, outcome).await {
                Inbound::Done(result) => return result,
                Inbound::Retry(token) => {
                    attempt = attempt.retry();
                    credential = Some(token);
                }
            }
        }
    }

    /// GET `target` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, target: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(target)).await?.json()
    }

    /// POST a JSON body to `target` and decode the JSON response.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        target: &str,
        body: serde_json::Value,
    ) -> Result<T, ApiError> {
        self.send(ApiRequest::post(target).json(body)).await?.json()
    }

    pub fn is_public(&self, target: &str) -> bool {
        self.classifier.is_public(target)
    }

    /// True if no credential exists or it expires within `leeway`
    /// (the configured leeway when `None`).
    pub fn is_expired(&self, leeway: Option<chrono::Duration>) -> bool {
        self.credentials.is_expired(leeway.unwrap_or(self.leeway))
    }

    pub async fn refresh(&self) -> Option<Secret> {
        self.refresher.refresh().await
    }

    pub async fn terminate(&self) {
        self.terminator.terminate().await
    }

    pub fn on_credentials_refreshed<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.refresher.on_credentials_refreshed(callback)
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn classifier(&self) -> &EndpointClassifier {
        &self.classifier
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    pub fn terminator(&self) -> &SessionTerminator {
        &self.terminator
    }

    /// Decide which credential, if any, the first attempt carries.
    async fn outbound(&self, attempt: &RequestAttempt) -> Result<Option<Secret>, ApiError> {
        let target = attempt.request().target();
        if self.classifier.is_public(target) {
            return Ok(None);
        }

        if self.credentials.is_expired(self.leeway) {
            tracing::debug!("Access token expired or expiring, refreshing before {}", target);
            if self.refresher.refresh().await.is_none() {
                tracing::info!("No credential for protected request {}", target);
                self.terminator.terminate().await;
                return Err(ApiError::AuthRequired);
            }
        }

        match self.credentials.access_token() {
            Some(token) => Ok(Some(token)),
            None => {
                tracing::info!("Credential vanished before protected request {}", target);
                self.terminator.terminate().await;
                Err(ApiError::AuthRequired)
            }
        }
    }

    async fn inbound(
        &self,
        attempt: &RequestAttempt,
        outcome: Result<ApiResponse, ApiError>,
    ) -> Inbound {
        let rejection = match outcome {
            Err(ApiError::Http(response)) if response.is_auth_rejection() => response,
            other => return Inbound::Done(other),
        };

        let target = attempt.request().target();
        if self.classifier.is_public(target) {
            return Inbound::Done(Err(ApiError::Http(rejection)));
        }

        if attempt.is_retry() {
            tracing::warn!(
                "{} rejected again after refresh ({}), ending session",
                target,
                rejection.status
            );
            self.terminator.terminate().await;
            return Inbound::Done(Err(ApiError::RetryExhausted(rejection)));
        }

        tracing::debug!("{} rejected ({}), refreshing and retrying once", target, rejection.status);
        match self.refresher.refresh().await {
            Some(token) => Inbound::Retry(token),
            None => {
                self.terminator.terminate().await;
                Inbound::Done(Err(ApiError::AuthRejected(rejection)))
            }
        }
    }

    /// Put one attempt on the wire.
    async fn execute(
        &self,
        attempt: &RequestAttempt,
        credential: Option<&Secret>,
    ) -> Result<ApiResponse, ApiError> {
        let request = attempt.request();
        let url = self
            .classifier
            .resolve(request.target())
            .map_err(|source| ApiError::InvalidTarget {
                target: request.target().to_string(),
                source,
            })?;

        let mut builder = self
            .http
            .request(request.method().clone(), url)
            .headers(request.headers().clone());
        if !request.query_pairs().is_empty() {
            builder = builder.query(request.query_pairs());
        }
        if let Some(token) = credential {
            builder = builder.bearer_auth(token.expose());
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        if status.is_success() {
            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        } else {
            Err(ApiError::Http(ErrorResponse::new(status, &body)))
        }
    }
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("base", &self.classifier.base().as_str())
            .field("leeway", &self.leeway)
            .finish()
    }
}
