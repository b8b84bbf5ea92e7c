use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::api::ApiError;
use crate::config::Config;

use super::{CredentialBackend, CredentialStore, Navigator};

/// Names under which the two session credentials are persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialNames {
    pub access: String,
    pub refresh: String,
}

/// Credentials issued by a login or refresh call.
///
/// Expiries are kept in wire form and normalized when stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "accessTokenExp", default)]
    pub access_token_exp: Option<Value>,
    #[serde(rename = "refreshToken", default)]
    pub refresh_token: Option<String>,
    #[serde(rename = "refreshTokenExp", default)]
    pub refresh_token_exp: Option<Value>,
}

/// One client session: its credentials, where to send the user when they
/// are gone, and a cached authenticated flag.
pub struct Session {
    store: CredentialStore,
    names: CredentialNames,
    login_path: Option<String>,
    navigator: Arc<dyn Navigator>,
    authenticated: AtomicBool,
}

impl Session {
    pub fn new(
        config: &Config,
        backend: Arc<dyn CredentialBackend>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let store = CredentialStore::new(backend, config.enforce_utc_expiry);
        let names = CredentialNames {
            access: config.access_credential_name.clone(),
            refresh: config.refresh_credential_name.clone(),
        };
        // Credentials persisted by an earlier run count as an established session
        let authenticated = store.contains(&names.access);

        Self {
            store,
            names,
            login_path: config.login_path.clone(),
            navigator,
            authenticated: AtomicBool::new(authenticated),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn names(&self) -> &CredentialNames {
        &self.names
    }

    pub fn navigator(&self) -> &dyn Navigator {
        self.navigator.as_ref()
    }

    pub fn login_path(&self) -> Option<&str> {
        self.login_path.as_deref()
    }

    /// Current access token, if present and unexpired
    pub fn access_token(&self) -> Option<String> {
        self.store.value(&self.names.access)
    }

    /// Current refresh token, if present and unexpired
    pub fn refresh_token(&self) -> Option<String> {
        self.store.value(&self.names.refresh)
    }

    /// Cached signal from the last login/refresh. Use `has_valid_credentials`
    /// for the authoritative answer.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn has_valid_credentials(&self) -> bool {
        self.store.contains(&self.names.access) || self.store.contains(&self.names.refresh)
    }

    /// Store a freshly issued grant. A grant without a refresh token keeps
    /// the current refresh credential.
    pub fn establish(&self, grant: &TokenGrant) -> Result<()> {
        self.store.set_with_raw_expiry(
            &self.names.access,
            &grant.access_token,
            grant.access_token_exp.as_ref(),
        )?;

        if let Some(ref refresh) = grant.refresh_token {
            self.store.set_with_raw_expiry(
                &self.names.refresh,
                refresh,
                grant.refresh_token_exp.as_ref(),
            )?;
        }

        self.authenticated.store(true, Ordering::Release);
        debug!(rotated_refresh = grant.refresh_token.is_some(), "Session established");
        Ok(())
    }

    pub fn mark_unauthenticated(&self) {
        self.authenticated.store(false, Ordering::Release);
    }

    /// Drop both credentials without navigating anywhere.
    pub fn invalidate(&self) -> Result<()> {
        self.mark_unauthenticated();
        self.store.clear(&self.names.access)?;
        self.store.clear(&self.names.refresh)?;
        Ok(())
    }

    /// Invalidate the session and send the user to the login path.
    pub fn logout(&self) -> Result<()> {
        self.invalidate()?;
        info!("Logged out");
        self.redirect_to_login();
        Ok(())
    }

    /// Redirect to the login path; no-op when none is configured.
    pub fn redirect_to_login(&self) {
        match self.login_path {
            Some(ref path) => {
                debug!(path = %path, "Redirecting to login");
                self.navigator.redirect_to(path);
            }
            None => debug!("No login path configured, skipping redirect"),
        }
    }

    /// Decode the claims of the access token, falling back to the refresh
    /// token. The signature is not verified - the server does that.
    pub fn claims(&self) -> Result<Value, ApiError> {
        let token = match self.access_token().or_else(|| self.refresh_token()) {
            Some(token) => token,
            None => {
                self.redirect_to_login();
                return Err(ApiError::Unauthenticated);
            }
        };
        decode_jwt_claims(&token)
    }
}

fn decode_jwt_claims(token: &str) -> Result<Value, ApiError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| ApiError::InvalidToken("missing payload segment".to_string()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ApiError::InvalidToken(format!("payload is not base64url: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::InvalidToken(format!("payload is not JSON: {}", e)))
}
