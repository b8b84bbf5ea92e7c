//! Core library for authgate - credential storage, session gating and an
//! authenticated HTTP client with retry and single-flight token refresh.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, Headers, Payload};
pub use auth::{GateDecision, Navigator, Session, SessionGate};
pub use config::Config;
