use std::collections::BTreeMap;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::headers::{is_authorization, AUTHORIZATION};
use crate::config::is_absolute_url;

/// Header name to value. Ordered so normalized output is deterministic.
pub type Headers = BTreeMap<String, String>;

/// One outbound call, fixed once built. A replay is a new descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    body: Option<Value>,
    headers: Headers,
}

impl RequestDescriptor {
    /// `body` is dropped for methods that carry no payload and when it is JSON `null`.
    pub fn new(method: Method, path: impl Into<String>, body: Option<Value>, headers: Headers) -> Self {
        let body = body.filter(|b| !b.is_null() && method_accepts_body(&method));
        Self {
            method,
            path: path.into(),
            body,
            headers,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Copy of this request carrying `Authorization: Bearer <token>`.
    pub fn with_bearer(&self, token: &str) -> Self {
        let mut headers: Headers = self
            .headers
            .iter()
            .filter(|(k, _)| !is_authorization(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.insert(AUTHORIZATION.to_string(), format!("Bearer {}", token));

        Self {
            method: self.method.clone(),
            path: self.path.clone(),
            body: self.body.clone(),
            headers,
        }
    }

    /// Token sent in a `Bearer` Authorization header, if any
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| is_authorization(k))
            .and_then(|(_, v)| v.strip_prefix("Bearer "))
    }

    /// Target URL: absolute paths as given, relative ones under `api_base_url`
    pub fn url(&self, api_base_url: &str) -> String {
        resolve_url(api_base_url, &self.path)
    }
}

fn method_accepts_body(method: &Method) -> bool {
    [Method::POST, Method::PUT, Method::PATCH, Method::DELETE].contains(method)
}

pub fn resolve_url(api_base_url: &str, path: &str) -> String {
    if is_absolute_url(path) {
        path.to_string()
    } else {
        format!("{}{}", api_base_url, path)
    }
}

/// Parsed response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    /// Body that was not valid JSON
    Text(String),
}

impl Payload {
    /// Parse as JSON, degrading to the raw text.
    pub fn from_body(body: String) -> Self {
        match serde_json::from_str(&body) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(body),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Text(_) => None,
        }
    }

    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        match self {
            Payload::Json(v) => serde_json::from_value(v),
            Payload::Text(s) => serde_json::from_value(Value::String(s)),
        }
    }

    /// The server's marker for a rejected credential: `{"<field>": false}`.
    pub fn is_auth_failure(&self, field: &str) -> bool {
        matches!(
            self.as_json().and_then(|v| v.get(field)),
            Some(Value::Bool(false))
        )
    }
}
