//! Session termination.
//!
//! When no credential can be recovered the store is cleared and the user is
//! sent to the sign-in surface through an injected [`Navigator`].

use std::sync::Arc;

use crate::credentials::CredentialStore;

/// Capability to move the user to the sign-in surface.
pub trait Navigator: Send + Sync {
    fn navigate_to_sign_in(&self, path: &str);
}

/// Navigator that only logs; for headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate_to_sign_in(&self, path: &str) {
        tracing::info!("Session ended, sign in again at {}", path);
    }
}

#[derive(Clone)]
pub struct SessionTerminator {
    credentials: Arc<CredentialStore>,
    navigator: Arc<dyn Navigator>,
    sign_in_path: String,
}

impl SessionTerminator {
    pub fn new(
        credentials: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
        sign_in_path: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            navigator,
            sign_in_path: sign_in_path.into(),
        }
    }

    pub fn sign_in_path(&self) -> &str {
        &self.sign_in_path
    }

    /// Clear every credential and redirect to sign-in.
    ///
    /// Safe to call when already logged out; the redirect still happens.
    pub async fn terminate(&self) {
        let had_session = self.credentials.read().is_some();
        if let Err(e) = self.credentials.clear().await {
            tracing::warn!("Failed to clear credentials while ending session: {}", e);
        }
        if had_session {
            tracing::info!("Terminated session for {}", self.credentials.namespace());
        }
        self.navigator.navigate_to_sign_in(&self.sign_in_path);
    }
}

impl std::fmt::Debug for SessionTerminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTerminator")
            .field("sign_in_path", &self.sign_in_path)
            .finish()
    }
}
