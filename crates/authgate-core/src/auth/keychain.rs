use anyhow::{Context, Result};
use keyring::Entry;

use super::{Credential, CredentialBackend};

const DEFAULT_SERVICE_NAME: &str = "authgate";

/// Credential backend on the OS keychain.
///
/// Each named credential is one keychain entry under the service name; the
/// value and expiry are stored together as JSON in the entry's secret.
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<Entry> {
        Entry::new(&self.service, name).context("Failed to create keyring entry")
    }

    fn encode(credential: &Credential) -> Result<String> {
        serde_json::to_string(credential).context("Failed to serialize credential")
    }

    /// Entries written by other tools hold a bare token; read those without expiry.
    fn decode(secret: String) -> Credential {
        serde_json::from_str(&secret).unwrap_or_else(|_| Credential::new(secret, None))
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_NAME)
    }
}

impl CredentialBackend for KeyringBackend {
    fn read(&self, name: &str) -> Result<Option<Credential>> {
        match self.entry(name)?.get_password() {
            Ok(secret) => Ok(Some(Self::decode(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve credential from keychain"),
        }
    }

    fn write(&self, name: &str, credential: &Credential) -> Result<()> {
        self.entry(name)?
            .set_password(&Self::encode(credential)?)
            .context("Failed to store credential in keychain")
    }

    fn delete(&self, name: &str) -> Result<()> {
        match self.entry(name)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_encode_decode_keeps_expiry() {
        let exp = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let credential = Credential::new("tok", Some(exp));

        let secret = KeyringBackend::encode(&credential).unwrap();
        assert_eq!(KeyringBackend::decode(secret), credential);
    }

    #[test]
    fn test_decode_bare_token() {
        let credential = KeyringBackend::decode("eyJhbGciOi.bare".to_string());
        assert_eq!(credential.value, "eyJhbGciOi.bare");
        assert_eq!(credential.expires_at, None);
    }

    #[test]
    fn test_default_service_name() {
        assert_eq!(KeyringBackend::default().service, "authgate");
    }
}
