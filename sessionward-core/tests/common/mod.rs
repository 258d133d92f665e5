//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use sessionward_core::{
    AuthClient, CredentialPair, CredentialStore, Navigator, PipelineConfig,
};
use wiremock::MockServer;

/// Navigator recording every sign-in redirect.
#[derive(Default)]
pub struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate_to_sign_in(&self, path: &str) {
        self.visits.lock().push(path.to_string());
    }
}

pub struct Harness {
    pub config: PipelineConfig,
    pub client: AuthClient,
    pub credentials: Arc<CredentialStore>,
    pub navigator: Arc<RecordingNavigator>,
}

pub fn config_for(server: &MockServer) -> PipelineConfig {
    PipelineConfig::with_base_url(format!("{}/api/", server.uri()))
}

pub fn harness(server: &MockServer) -> Harness {
    let config = config_for(server);
    let credentials = Arc::new(CredentialStore::in_memory("test"));
    let navigator = Arc::new(RecordingNavigator::default());
    let client = AuthClient::new(&config, credentials.clone(), navigator.clone()).unwrap();
    Harness {
        config,
        client,
        credentials,
        navigator,
    }
}

/// Unsigned JWT whose `exp` lies `secs_from_now` seconds away.
pub fn jwt(secs_from_now: i64) -> String {
    let exp = (Utc::now() + Duration::seconds(secs_from_now)).timestamp();
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"token_type":"access","exp":{exp},"user_id":7}}"#));
    format!("{header}.{payload}.signature")
}

pub fn valid_pair(access: &str, refresh: &str) -> CredentialPair {
    CredentialPair::new(access, refresh, Utc::now() + Duration::hours(1))
}

pub fn expired_pair(access: &str, refresh: &str) -> CredentialPair {
    CredentialPair::new(access, refresh, Utc::now() - Duration::minutes(1))
}
