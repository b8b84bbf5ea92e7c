//! Authenticated API client.
//!
//! `ApiClient` is the verb-oriented entry point. Each call normalizes
//! headers against the session's access credential, goes through the
//! retrying executor and, when the server reports a rejected credential,
//! recovers through the shared refresh coordinator and replays the request.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::headers::{normalize_headers, AuthorizationPrecedence};
use super::refresh::{RefreshCoordinator, RefreshFailure, RefreshOutcome};
use super::request::{resolve_url, Headers, Payload, RequestDescriptor};
use super::retry::{RetryPolicy, RetryingExecutor};
use super::ApiError;
use crate::auth::{Session, TokenGrant};
use crate::config::Config;

/// Body of the refresh endpoint's answer
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
    #[serde(rename = "accessTokenExp")]
    access_token_exp: Option<Value>,
    #[serde(rename = "refreshToken")]
    refresh_token: Option<String>,
    #[serde(rename = "refreshTokenExp")]
    refresh_token_exp: Option<Value>,
}

impl RefreshResponse {
    fn into_grant(self) -> Option<TokenGrant> {
        if !self.success {
            return None;
        }
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        Some(TokenGrant {
            access_token,
            access_token_exp: self.access_token_exp,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            refresh_token_exp: self.refresh_token_exp,
        })
    }
}

/// A response with its body parsed
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub payload: Payload,
}

/// Settings shared by every clone of a client
struct ClientSettings {
    api_base_url: String,
    refresh_endpoint_path: String,
    precedence: AuthorizationPrecedence,
    auth_failure_field: String,
}

/// API client bound to one session.
/// Clone is cheap - clones share the connection pool, session and refresh coordinator.
#[derive(Clone)]
pub struct ApiClient {
    executor: RetryingExecutor,
    session: Arc<Session>,
    coordinator: Arc<RefreshCoordinator>,
    settings: Arc<ClientSettings>,
}

impl ApiClient {
    /// Create a client for `session`
    pub fn new(config: &Config, session: Arc<Session>) -> Result<Self, ApiError> {
        config
            .validate()
            .map_err(|e| ApiError::InvalidRequest(format!("{:#}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            executor: RetryingExecutor::new(client, RetryPolicy::from_config(config)),
            session,
            coordinator: Arc::new(RefreshCoordinator::new()),
            settings: Arc::new(ClientSettings {
                api_base_url: config.api_base_url.clone(),
                refresh_endpoint_path: config.refresh_endpoint_path.clone(),
                precedence: config.authorization_precedence,
                auth_failure_field: config.auth_failure_field.clone(),
            }),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    // ===== Verbs =====

    pub async fn get(&self, path: &str, headers: Option<Headers>) -> Result<Option<Payload>, ApiError> {
        self.request(Method::GET, path, None, headers).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: Option<Value>,
        headers: Option<Headers>,
    ) -> Result<Option<Payload>, ApiError> {
        self.request(Method::POST, path, body, headers).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: Option<Value>,
        headers: Option<Headers>,
    ) -> Result<Option<Payload>, ApiError> {
        self.request(Method::PUT, path, body, headers).await
    }

    pub async fn patch(
        &self,
        path: &str,
        body: Option<Value>,
        headers: Option<Headers>,
    ) -> Result<Option<Payload>, ApiError> {
        self.request(Method::PATCH, path, body, headers).await
    }

    pub async fn delete(
        &self,
        path: &str,
        body: Option<Value>,
        headers: Option<Headers>,
    ) -> Result<Option<Payload>, ApiError> {
        self.request(Method::DELETE, path, body, headers).await
    }

    /// Issue a request. `Ok(None)` means the credential was rejected and could
    /// not be recovered; the user has been sent to the login path.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: Option<Headers>,
    ) -> Result<Option<Payload>, ApiError> {
        Ok(self
            .send(method, path, body, headers)
            .await?
            .map(|reply| reply.payload))
    }

    /// GET and deserialize a successful JSON response
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let reply = self
            .send(Method::GET, path, None, None)
            .await?
            .ok_or(ApiError::Unauthenticated)?;

        if !reply.status.is_success() {
            let body = match reply.payload {
                Payload::Json(v) => v.to_string(),
                Payload::Text(s) => s,
            };
            return Err(ApiError::from_status(reply.status, &body));
        }

        reply
            .payload
            .deserialize()
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e)))
    }

    /// Like `request`, keeping the final status alongside the payload.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: Option<Headers>,
    ) -> Result<Option<Reply>, ApiError> {
        let access = self.session.access_token();
        let headers = normalize_headers(
            &headers.unwrap_or_default(),
            access.as_deref(),
            self.settings.precedence,
        );
        let descriptor = RequestDescriptor::new(method, path, body, headers);
        let url = descriptor.url(&self.settings.api_base_url);
        let generation = self.coordinator.generation();

        let reply = self.dispatch(&url, &descriptor).await?;
        if !reply.payload.is_auth_failure(&self.settings.auth_failure_field) {
            return Ok(Some(reply));
        }

        debug!(method = %descriptor.method(), url = %url, "Credential rejected by server");
        self.recover(&url, &descriptor, generation).await
    }

    async fn dispatch(&self, url: &str, descriptor: &RequestDescriptor) -> Result<Reply, ApiError> {
        let response = self.executor.execute(url, descriptor).await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(Reply {
            status,
            payload: Payload::from_body(body),
        })
    }

    /// Recover from a rejected credential for a request sent at `generation`.
    /// The coordinator either joins the in-flight episode, hands back the
    /// outcome of one that settled after the request was sent, or leads a new one.
    async fn recover(
        &self,
        url: &str,
        descriptor: &RequestDescriptor,
        generation: u64,
    ) -> Result<Option<Reply>, ApiError> {
        match self.coordinator.refresh(generation, || self.refresh_session()).await {
            Ok(token) => self.replay(url, descriptor, &token).await.map(Some),
            Err(e) => {
                debug!(error = %e, "Dropping request after failed refresh");
                Ok(None)
            }
        }
    }

    async fn replay(&self, url: &str, descriptor: &RequestDescriptor, token: &str) -> Result<Reply, ApiError> {
        let replay = descriptor.with_bearer(token);
        debug!(method = %replay.method(), url = %url, "Replaying request with refreshed credential");
        self.dispatch(url, &replay).await
    }

    /// Leader side of a refresh episode: call the endpoint, store the grant,
    /// and on failure end the session.
    async fn refresh_session(&self) -> RefreshOutcome {
        let outcome = self.call_refresh_endpoint().await;

        if let Err(ref e) = outcome {
            if matches!(e, RefreshFailure::NoRefreshCredential) {
                info!("Credential rejected and no refresh credential, sending user to login");
            }
            self.session.mark_unauthenticated();
            if matches!(e, RefreshFailure::Rejected(_)) {
                if let Err(e) = self.session.invalidate() {
                    warn!(error = %e, "Failed to clear rejected credentials");
                }
            }
            self.session.redirect_to_login();
        }
        outcome
    }

    async fn call_refresh_endpoint(&self) -> RefreshOutcome {
        let refresh_token = self
            .session
            .refresh_token()
            .ok_or(RefreshFailure::NoRefreshCredential)?;

        let headers = normalize_headers(&Headers::new(), None, self.settings.precedence);
        let descriptor = RequestDescriptor::new(
            Method::POST,
            self.settings.refresh_endpoint_path.as_str(),
            Some(json!({ "refreshToken": refresh_token })),
            headers,
        );
        let url = resolve_url(&self.settings.api_base_url, descriptor.path());

        let response = self
            .executor
            .execute(&url, &descriptor)
            .await
            .map_err(|e| RefreshFailure::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RefreshFailure::Transport(e.to_string()))?;

        if status.is_server_error() {
            return Err(RefreshFailure::Transport(format!(
                "status {}: {}",
                status,
                ApiError::truncate_body(&body)
            )));
        }
        if !status.is_success() {
            return Err(RefreshFailure::Rejected(format!(
                "status {}: {}",
                status,
                ApiError::truncate_body(&body)
            )));
        }

        let grant = serde_json::from_str::<RefreshResponse>(&body)
            .ok()
            .and_then(RefreshResponse::into_grant)
            .ok_or_else(|| RefreshFailure::Rejected("response did not report success".to_string()))?;

        self.session
            .establish(&grant)
            .map_err(|e| RefreshFailure::Storage(format!("{:#}", e)))?;

        Ok(grant.access_token)
    }
}
