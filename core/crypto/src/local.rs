//! Local keyring provider.
//!
//! Keeps 256-bit keys in a JSON keyring file and encrypts with
//! XChaCha20-Poly1305. Behaves like a remote symmetric KMS key: it
//! reports `SYMMETRIC_DEFAULT` and rejects payloads above 4096 bytes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::aead::{open, seal};
use crate::keys::DataKey;
use crate::profile::{max_payload_bytes, EncryptionAlgorithm, KeyDescription, KeySpec};
use crate::provider::CryptoProvider;
use secenv_common::{Error, KeyId, Result};

/// Keyring file format version.
pub const KEYRING_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct KeyringFile {
    version: u32,
    keys: Vec<KeyringEntry>,
}

#[derive(Serialize, Deserialize)]
struct KeyringEntry {
    id: KeyId,
    material: String,
    created_at: DateTime<Utc>,
}

impl Drop for KeyringEntry {
    fn drop(&mut self) {
        self.material.zeroize();
    }
}

struct StoredKey {
    key: DataKey,
    created_at: DateTime<Utc>,
}

/// Set of named data keys.
#[derive(Default)]
pub struct Keyring {
    keys: BTreeMap<KeyId, StoredKey>,
}

impl Keyring {
    /// Create an empty keyring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new key and return its id.
    pub fn generate_key(&mut self) -> Result<KeyId> {
        let id = KeyId::new(Uuid::new_v4().to_string())?;
        self.keys.insert(
            id.clone(),
            StoredKey {
                key: DataKey::generate(),
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    /// Add an existing key under `id`.
    ///
    /// # Errors
    /// - Returns error if `id` is already present
    pub fn insert(&mut self, id: KeyId, key: DataKey) -> Result<()> {
        if self.keys.contains_key(&id) {
            return Err(Error::AlreadyExists(format!("Key '{}' already exists", id)));
        }
        self.keys.insert(
            id,
            StoredKey {
                key,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Check if a key is present.
    pub fn contains(&self, id: &KeyId) -> bool {
        self.keys.contains_key(id)
    }

    /// List key ids in sorted order.
    pub fn key_ids(&self) -> Vec<KeyId> {
        self.keys.keys().cloned().collect()
    }

    /// Creation time of a key.
    pub fn created_at(&self, id: &KeyId) -> Option<DateTime<Utc>> {
        self.keys.get(id).map(|stored| stored.created_at)
    }

    fn key(&self, id: &KeyId) -> Result<&DataKey> {
        self.keys
            .get(id)
            .map(|stored| &stored.key)
            .ok_or_else(|| Error::NotFound(format!("Key not found: {}", id)))
    }

    /// Serialize keyring to JSON.
    pub fn to_json(&self) -> Result<String> {
        let file = KeyringFile {
            version: KEYRING_VERSION,
            keys: self
                .keys
                .iter()
                .map(|(id, stored)| KeyringEntry {
                    id: id.clone(),
                    material: stored.key.to_base64(),
                    created_at: stored.created_at,
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Deserialize keyring from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: KeyringFile = serde_json::from_str(json)?;
        if file.version != KEYRING_VERSION {
            return Err(Error::InvalidInput(format!(
                "Unsupported keyring version: {}",
                file.version
            )));
        }

        let mut keyring = Self::new();
        for entry in &file.keys {
            if keyring.contains(&entry.id) {
                return Err(Error::InvalidInput(format!(
                    "Duplicate key '{}' in keyring",
                    entry.id
                )));
            }
            keyring.keys.insert(
                entry.id.clone(),
                StoredKey {
                    key: DataKey::from_base64(&entry.material)?,
                    created_at: entry.created_at,
                },
            );
        }
        Ok(keyring)
    }

    /// Load a keyring file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Write the keyring to `path`, readable by the owner only on unix.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        use std::io::Write;

        let json = self.to_json()?;
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

/// Crypto provider backed by a local keyring.
pub struct LocalProvider {
    keyring: Keyring,
}

impl LocalProvider {
    /// Create a provider over an in-memory keyring.
    pub fn new(keyring: Keyring) -> Self {
        Self { keyring }
    }

    /// Create a provider from a keyring file.
    pub fn from_keyring_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading keyring");
        Ok(Self::new(Keyring::load(path)?))
    }

    fn payload_bound(algorithm: EncryptionAlgorithm) -> Result<usize> {
        max_payload_bytes(KeySpec::SymmetricDefault, algorithm).ok_or_else(|| {
            Error::CryptoProvider(format!("local keys do not support {}", algorithm))
        })
    }
}

#[async_trait]
impl CryptoProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn describe_key(&self, key_id: &KeyId) -> Result<KeyDescription> {
        self.keyring.key(key_id)?;
        Ok(KeyDescription {
            key_id: key_id.clone(),
            key_spec: KeySpec::SymmetricDefault.to_string(),
            encryption_algorithms: vec![EncryptionAlgorithm::SymmetricDefault.to_string()],
        })
    }

    async fn encrypt(
        &self,
        key_id: &KeyId,
        algorithm: EncryptionAlgorithm,
        plaintext: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let max = Self::payload_bound(algorithm)?;
        if plaintext.len() > max {
            return Err(Error::CryptoProvider(format!(
                "plaintext of {} bytes exceeds {} byte limit",
                plaintext.len(),
                max
            )));
        }
        let key = self.keyring.key(key_id)?;
        seal(key, key_id.as_str().as_bytes(), plaintext).map(Some)
    }

    async fn decrypt(
        &self,
        key_id: &KeyId,
        algorithm: EncryptionAlgorithm,
        ciphertext: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        Self::payload_bound(algorithm)?;
        let key = self.keyring.key(key_id)?;
        open(key, key_id.as_str().as_bytes(), ciphertext).map(Some)
    }
}
