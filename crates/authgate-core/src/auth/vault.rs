//! Passphrase-encrypted credential file.
//!
//! Layout: `MAGIC || salt (16) || nonce (12) || ciphertext`. The plaintext is
//! a JSON map of credential name to [`Credential`]. The key is derived from
//! the passphrase with Argon2id once per backend instance; every write uses a
//! fresh nonce.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, bail, Context, Result};
use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use super::{Credential, CredentialBackend};

const MAGIC: &[u8; 4] = b"AGV1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

const APP_NAME: &str = "authgate";
const VAULT_FILE: &str = "credentials.vault";

type Entries = HashMap<String, Credential>;

pub struct EncryptedFileBackend {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    cipher: ChaCha20Poly1305,
    // Serializes read-modify-write cycles on the file
    lock: Mutex<()>,
}

impl EncryptedFileBackend {
    /// Open (or prepare to create) a vault at `path`.
    ///
    /// An existing vault keeps its salt, so the passphrase must match the one
    /// it was written with; that is checked on first read.
    pub fn new(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self> {
        let path = path.into();
        let salt = match std::fs::read(&path) {
            Ok(bytes) => Self::split_header(&bytes)?.0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut salt = [0u8; SALT_LEN];
                OsRng.fill_bytes(&mut salt);
                salt
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read vault: {}", path.display()))
            }
        };

        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), &salt, &mut key)
            .map_err(|e| anyhow!("Failed to derive vault key: {}", e))?;

        Ok(Self {
            path,
            salt,
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            lock: Mutex::new(()),
        })
    }

    /// Vault in the user cache directory, e.g. `~/.cache/authgate/credentials.vault`
    pub fn in_cache_dir(passphrase: &str) -> Result<Self> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow!("Could not find cache directory"))?;
        Self::new(cache_dir.join(APP_NAME).join(VAULT_FILE), passphrase)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn split_header(bytes: &[u8]) -> Result<([u8; SALT_LEN], [u8; NONCE_LEN], &[u8])> {
        if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
            bail!("Not a credential vault file");
        }
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&bytes[MAGIC.len()..MAGIC.len() + SALT_LEN]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[MAGIC.len() + SALT_LEN..HEADER_LEN]);
        Ok((salt, nonce, &bytes[HEADER_LEN..]))
    }

    fn load(&self) -> Result<Entries> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(e).context("Failed to read vault file"),
        };

        let (_, nonce, ciphertext) = Self::split_header(&bytes)?;
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| anyhow!("Failed to decrypt vault - wrong passphrase or corrupt file"))?;

        serde_json::from_slice(&plaintext).context("Failed to parse vault contents")
    }

    fn save(&self, entries: &Entries) -> Result<()> {
        let plaintext = serde_json::to_vec(entries)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| anyhow!("Failed to encrypt vault"))?;

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, out).context("Failed to write vault file")?;
        debug!(path = %self.path.display(), entries = entries.len(), "Vault saved");
        Ok(())
    }
}

impl CredentialBackend for EncryptedFileBackend {
    fn read(&self, name: &str) -> Result<Option<Credential>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(name))
    }

    fn write(&self, name: &str, credential: &Credential) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        entries.insert(name.to_string(), credential.clone());
        self.save(&entries)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        if entries.remove(name).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}
