use std::collections::BTreeSet;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use super::request::RequestDescriptor;
use super::ApiError;
use crate::config::Config;

/// When to try a call again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    pub non_retryable: BTreeSet<u16>,
    /// First delay; doubled per retry up to `backoff_max`. Zero retries immediately.
    pub backoff: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            non_retryable: config.non_retryable_statuses.iter().copied().collect(),
            backoff: Duration::from_millis(config.retry_backoff_ms),
            backoff_max: Duration::from_millis(config.retry_backoff_max_ms),
        }
    }

    pub fn should_retry_status(&self, status: StatusCode) -> bool {
        !status.is_success() && !self.non_retryable.contains(&status.as_u16())
    }

    /// Delay before retry number `retry` (0-based)
    fn delay(&self, retry: u32) -> Duration {
        if self.backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry);
        self.backoff.saturating_mul(factor).min(self.backoff_max)
    }
}

/// Issues one logical call with bounded retry.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct RetryingExecutor {
    client: Client,
    policy: RetryPolicy,
}

impl RetryingExecutor {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    fn header_map(request: &RequestDescriptor) -> Result<HeaderMap, ApiError> {
        let mut map = HeaderMap::with_capacity(request.headers().len());
        for (name, value) in request.headers() {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ApiError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| ApiError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            if map.contains_key(&header_name) {
                debug!(header = %header_name, "Header given in several spellings, sending every value");
            }
            map.append(header_name, header_value);
        }
        Ok(map)
    }

    /// Send `request` to `url`, retrying transport errors and retryable
    /// statuses. After the last attempt the final response is returned as is,
    /// whatever its status; a final transport error is returned as `NetworkError`.
    pub async fn execute(&self, url: &str, request: &RequestDescriptor) -> Result<Response, ApiError> {
        let headers = Self::header_map(request)?;
        let body = request
            .body()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| ApiError::InvalidRequest(format!("body is not serializable: {}", e)))?;

        let mut retry = 0;
        loop {
            let mut builder = self
                .client
                .request(request.method().clone(), url)
                .headers(headers.clone());
            if let Some(ref body) = body {
                builder = builder.body(body.clone());
            }

            let remaining = self.policy.max_retries - retry;
            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if remaining == 0 || !self.policy.should_retry_status(status) {
                        debug!(method = %request.method(), url, status = %status, attempts = retry + 1, "Request completed");
                        return Ok(response);
                    }
                    warn!(method = %request.method(), url, status = %status, retry = retry + 1, "Retryable status, retrying");
                }
                Err(e) => {
                    if remaining == 0 {
                        warn!(method = %request.method(), url, error = %e, attempts = retry + 1, "Request failed, retries exhausted");
                        return Err(e.into());
                    }
                    warn!(method = %request.method(), url, error = %e, retry = retry + 1, "Transport error, retrying");
                }
            }

            let delay = self.policy.delay(retry);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            retry += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::request::Headers;
    use httpmock::prelude::*;
    use reqwest::Method;
    use serde_json::json;

    fn executor(max_retries: u32) -> RetryingExecutor {
        let policy = RetryPolicy {
            max_retries,
            ..RetryPolicy::default()
        };
        RetryingExecutor::new(Client::new(), policy)
    }

    fn get(path: &str) -> RequestDescriptor {
        RequestDescriptor::new(Method::GET, path, None, Headers::new())
    }

    #[tokio::test]
    async fn test_server_error_uses_whole_budget() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/flaky");
            then.status(500).body("boom");
        });

        let response = executor(3)
            .execute(&server.url("/flaky"), &get("/flaky"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mock.calls(), 4, "expected 4 calls, got {}", mock.calls());
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404);
        });

        let response = executor(3)
            .execute(&server.url("/missing"), &get("/missing"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_set_is_configurable() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/bad");
            then.status(400);
        });

        let policy = RetryPolicy {
            max_retries: 2,
            non_retryable: [401, 404].into_iter().collect(),
            ..RetryPolicy::default()
        };
        let response = RetryingExecutor::new(Client::new(), policy)
            .execute(&server.url("/bad"), &get("/bad"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_success_is_single_call() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/items")
                .header("content-type", "application/json")
                .json_body(json!({"name": "tent"}));
            then.status(201).json_body(json!({"id": 7}));
        });

        let mut headers = Headers::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        let request = RequestDescriptor::new(Method::POST, "/items", Some(json!({"name": "tent"})), headers);

        let response = executor(3).execute(&server.url("/items"), &request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_budget_returns_first_failure() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/down");
            then.status(503);
        });

        let response = executor(0)
            .execute(&server.url("/down"), &get("/down"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_surfaces_after_budget() {
        // Nothing listens on this port once the listener is dropped
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = executor(2)
            .execute(&format!("http://{}/x", addr), &get("/x"))
            .await
            .unwrap_err();
        assert!(err.is_network(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_invalid_header_is_rejected_before_sending() {
        let mut headers = Headers::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let request = RequestDescriptor::new(Method::GET, "/", None, headers);

        let err = executor(3)
            .execute("http://127.0.0.1:9/", &request)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidHeader { ref name, .. } if name == "bad header"));
    }

    #[test]
    fn test_case_variant_headers_are_all_kept() {
        let mut headers = Headers::new();
        headers.insert("X-Trace".to_string(), "a".to_string());
        headers.insert("x-trace".to_string(), "b".to_string());
        let request = RequestDescriptor::new(Method::GET, "/", None, headers);

        let map = RetryingExecutor::header_map(&request).unwrap();
        let values: Vec<_> = map
            .get_all("x-trace")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            backoff: Duration::from_millis(100),
            backoff_max: Duration::from_millis(350),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(350));
        assert_eq!(policy.delay(40), Duration::from_millis(350));

        assert_eq!(RetryPolicy::default().delay(3), Duration::ZERO);
    }

    #[test]
    fn test_should_retry_status() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(policy.should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!policy.should_retry_status(StatusCode::OK));
        assert!(!policy.should_retry_status(StatusCode::BAD_REQUEST));
        assert!(!policy.should_retry_status(StatusCode::UNAUTHORIZED));
        assert!(!policy.should_retry_status(StatusCode::NOT_FOUND));
    }
}
