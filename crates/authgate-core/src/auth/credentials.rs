use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::CredentialBackend;
use super::expiry::parse_expiry;

/// A named credential value with an optional expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| Utc::now() >= exp).unwrap_or(false)
    }
}

/// Session-scoped credential record on top of a persistence backend.
///
/// Expiry is checked lazily on every read: an expired credential is reported
/// as absent but is left in the backend until it is overwritten or cleared.
/// Clone is cheap - the backend is shared behind an `Arc`.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn CredentialBackend>,
    enforce_utc_expiry: bool,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn CredentialBackend>, enforce_utc_expiry: bool) -> Self {
        Self {
            backend,
            enforce_utc_expiry,
        }
    }

    /// Get a credential if it exists and has not expired.
    ///
    /// Backend read failures are logged and treated as absence.
    pub fn get(&self, name: &str) -> Option<Credential> {
        match self.backend.read(name) {
            Ok(Some(credential)) if credential.is_expired() => {
                debug!(name, "Credential expired, treating as absent");
                None
            }
            Ok(found) => found,
            Err(e) => {
                warn!(name, error = %e, "Failed to read credential");
                None
            }
        }
    }

    /// Get only the value of a live credential
    pub fn value(&self, name: &str) -> Option<String> {
        self.get(name).map(|c| c.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn set(&self, name: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        self.backend.write(name, &Credential::new(value, expires_at))?;
        debug!(name, expires_at = ?expires_at, "Credential stored");
        Ok(())
    }

    /// Store a credential whose expiry arrives in wire form (string or epoch number).
    pub fn set_with_raw_expiry(
        &self,
        name: &str,
        value: &str,
        raw_expiry: Option<&serde_json::Value>,
    ) -> Result<()> {
        let expires_at = raw_expiry.and_then(|raw| parse_expiry(raw, self.enforce_utc_expiry));
        self.set(name, value, expires_at)
    }

    pub fn clear(&self, name: &str) -> Result<()> {
        self.backend.delete(name)?;
        debug!(name, "Credential cleared");
        Ok(())
    }
}
