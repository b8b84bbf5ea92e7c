use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use anyhow::Result;

use super::Credential;

/// Persistence for named credentials.
///
/// Implementations only store and return what they are given; expiry is
/// interpreted by [`super::CredentialStore`].
pub trait CredentialBackend: Send + Sync {
    fn read(&self, name: &str) -> Result<Option<Credential>>;
    fn write(&self, name: &str, credential: &Credential) -> Result<()>;
    fn delete(&self, name: &str) -> Result<()>;
}

/// Process-lifetime backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Credential>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialBackend for MemoryBackend {
    fn read(&self, name: &str) -> Result<Option<Credential>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(name).cloned())
    }

    fn write(&self, name: &str, credential: &Credential) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(name.to_string(), credential.clone());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(name);
        Ok(())
    }
}
