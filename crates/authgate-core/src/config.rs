//! Client configuration.
//!
//! Configuration is stored at `~/.config/authgate/config.json` and may be
//! overridden field by field through `AUTHGATE_*` environment variables.
//! Every field except `api_base_url` has a default.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::AuthorizationPrecedence;

/// Application name used for the config directory path
const APP_NAME: &str = "authgate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_ACCESS_CREDENTIAL: &str = "appAccessToken";
pub const DEFAULT_REFRESH_CREDENTIAL: &str = "appRefreshToken";
pub const DEFAULT_REFRESH_ENDPOINT: &str = "/auth/refresh-token";

/// Retries after the first attempt (4 calls in total)
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub access_credential_name: String,
    pub refresh_credential_name: String,
    /// Where to send the user when no credential is left. `None` disables redirects.
    pub login_path: Option<String>,
    pub refresh_endpoint_path: String,
    /// Read naive expiry timestamps as UTC instead of host-local time
    pub enforce_utc_expiry: bool,
    /// Gate every navigation instead of only routes that opt in
    pub global_gate: bool,

    pub max_retries: u32,
    pub non_retryable_statuses: Vec<u16>,
    /// Initial retry delay; 0 retries immediately
    pub retry_backoff_ms: u64,
    pub retry_backoff_max_ms: u64,
    pub request_timeout_secs: u64,

    pub authorization_precedence: AuthorizationPrecedence,
    /// Response field that is `false` when the server rejected the credential
    pub auth_failure_field: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            access_credential_name: DEFAULT_ACCESS_CREDENTIAL.to_string(),
            refresh_credential_name: DEFAULT_REFRESH_CREDENTIAL.to_string(),
            login_path: None,
            refresh_endpoint_path: DEFAULT_REFRESH_ENDPOINT.to_string(),
            enforce_utc_expiry: true,
            global_gate: false,
            max_retries: DEFAULT_MAX_RETRIES,
            non_retryable_statuses: vec![400, 401, 404],
            retry_backoff_ms: 0,
            retry_backoff_max_ms: 5_000,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            authorization_precedence: AuthorizationPrecedence::default(),
            auth_failure_field: "login".to_string(),
        }
    }
}

impl Config {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    /// Load from the user config directory, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `AUTHGATE_*` environment variables on top of the loaded values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("AUTHGATE_API_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = lookup("AUTHGATE_ACCESS_CREDENTIAL") {
            self.access_credential_name = v;
        }
        if let Some(v) = lookup("AUTHGATE_REFRESH_CREDENTIAL") {
            self.refresh_credential_name = v;
        }
        if let Some(v) = lookup("AUTHGATE_LOGIN_PATH") {
            self.login_path = Some(v).filter(|p| !p.is_empty());
        }
        if let Some(v) = lookup("AUTHGATE_REFRESH_ENDPOINT") {
            self.refresh_endpoint_path = v;
        }
        if let Some(v) = lookup("AUTHGATE_ENFORCE_UTC_EXPIRY") {
            self.enforce_utc_expiry = parse_bool("AUTHGATE_ENFORCE_UTC_EXPIRY", &v)?;
        }
        if let Some(v) = lookup("AUTHGATE_GLOBAL_GATE") {
            self.global_gate = parse_bool("AUTHGATE_GLOBAL_GATE", &v)?;
        }
        if let Some(v) = lookup("AUTHGATE_MAX_RETRIES") {
            self.max_retries = v
                .parse()
                .with_context(|| format!("AUTHGATE_MAX_RETRIES is not a number: {}", v))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.is_empty() {
            bail!("api_base_url is required");
        }
        if !is_absolute_url(&self.api_base_url) {
            bail!("api_base_url must be an http(s) URL: {}", self.api_base_url);
        }
        if self.access_credential_name.is_empty() || self.refresh_credential_name.is_empty() {
            bail!("credential names must not be empty");
        }
        if self.access_credential_name == self.refresh_credential_name {
            bail!("access and refresh credentials need distinct names");
        }
        Ok(())
    }
}

pub(crate) fn is_absolute_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{} must be a boolean, got {:?}", key, value),
    }
}
