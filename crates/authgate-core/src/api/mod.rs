//! HTTP access layer.
//!
//! This module provides the `ApiClient` facade plus the pieces it is built
//! from: header normalization, the retrying executor and the single-flight
//! refresh coordinator. Requests carry the session's access credential as a
//! bearer token and are replayed once after a successful refresh.

pub mod client;
pub mod error;
pub mod headers;
pub mod refresh;
pub mod request;
pub mod retry;

pub use client::{ApiClient, Reply};
pub use error::ApiError;
pub use headers::{normalize_headers, AuthorizationPrecedence};
pub use refresh::{RefreshCoordinator, RefreshFailure, RefreshOutcome};
pub use request::{Headers, Payload, RequestDescriptor};
pub use retry::{RetryPolicy, RetryingExecutor};
pub use reqwest::Method;
