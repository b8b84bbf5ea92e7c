//! Credential lifecycle and navigation gating.
//!
//! This module provides:
//! - `CredentialStore`: named credentials with lazy expiry over a pluggable backend
//! - `KeyringBackend` / `EncryptedFileBackend`: persistent backends (OS keychain, encrypted file)
//! - `Session`: the access/refresh pair, login grants, logout and JWT claims
//! - `SessionGate`: allow/redirect decision evaluated before navigation

pub mod backend;
pub mod credentials;
pub mod expiry;
pub mod gate;
pub mod keychain;
pub mod session;
pub mod vault;

pub use backend::{CredentialBackend, MemoryBackend};
pub use credentials::{Credential, CredentialStore};
pub use gate::{decide, GateDecision, Navigator, SessionGate};
pub use keychain::KeyringBackend;
pub use session::{CredentialNames, Session, TokenGrant};
pub use vault::EncryptedFileBackend;
