//! In-memory crypto provider for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::aead::{open, seal};
use crate::keys::DataKey;
use crate::profile::{max_payload_bytes, EncryptionAlgorithm, KeyDescription, KeySpec};
use crate::provider::CryptoProvider;
use secenv_common::{Error, KeyId, Result};

/// In-memory crypto provider.
///
/// Keys are created on first use and lost on drop. The provider reports a
/// configurable key spec and enforces that spec's payload bound the way a
/// remote KMS would, so it can stand in for one in tests and dry runs.
pub struct MemoryProvider {
    key_spec: KeySpec,
    algorithms: Vec<EncryptionAlgorithm>,
    keys: Mutex<HashMap<KeyId, DataKey>>,
    encrypt_calls: AtomicUsize,
    decrypt_calls: AtomicUsize,
}

impl MemoryProvider {
    /// Create a provider reporting symmetric keys.
    pub fn new() -> Self {
        Self::with_key_spec(
            KeySpec::SymmetricDefault,
            vec![EncryptionAlgorithm::SymmetricDefault],
        )
    }

    /// Create a provider reporting `key_spec` with `algorithms`.
    pub fn with_key_spec(key_spec: KeySpec, algorithms: Vec<EncryptionAlgorithm>) -> Self {
        Self {
            key_spec,
            algorithms,
            keys: Mutex::new(HashMap::new()),
            encrypt_calls: AtomicUsize::new(0),
            decrypt_calls: AtomicUsize::new(0),
        }
    }

    /// Number of encrypt calls served so far.
    pub fn encrypt_calls(&self) -> usize {
        self.encrypt_calls.load(Ordering::SeqCst)
    }

    /// Number of decrypt calls served so far.
    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    fn check_algorithm(&self, algorithm: EncryptionAlgorithm) -> Result<usize> {
        if !self.algorithms.contains(&algorithm) {
            return Err(Error::CryptoProvider(format!(
                "{} key does not support {}",
                self.key_spec, algorithm
            )));
        }
        max_payload_bytes(self.key_spec, algorithm).ok_or_else(|| {
            Error::CryptoProvider(format!("{} cannot be used with {}", algorithm, self.key_spec))
        })
    }

    fn key_for(&self, key_id: &KeyId, create: bool) -> Result<DataKey> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| Error::Crypto("Key store lock poisoned".to_string()))?;
        if create {
            return Ok(keys
                .entry(key_id.clone())
                .or_insert_with(DataKey::generate)
                .clone());
        }
        keys.get(key_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Key not found: {}", key_id)))
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn associated_data(key_id: &KeyId, algorithm: EncryptionAlgorithm) -> Vec<u8> {
    format!("{}:{}", key_id, algorithm).into_bytes()
}

#[async_trait]
impl CryptoProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn describe_key(&self, key_id: &KeyId) -> Result<KeyDescription> {
        Ok(KeyDescription {
            key_id: key_id.clone(),
            key_spec: self.key_spec.to_string(),
            encryption_algorithms: self.algorithms.iter().map(|a| a.to_string()).collect(),
        })
    }

    async fn encrypt(
        &self,
        key_id: &KeyId,
        algorithm: EncryptionAlgorithm,
        plaintext: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        let max = self.check_algorithm(algorithm)?;
        if plaintext.len() > max {
            return Err(Error::CryptoProvider(format!(
                "plaintext of {} bytes exceeds {} byte limit",
                plaintext.len(),
                max
            )));
        }
        let key = self.key_for(key_id, true)?;
        seal(&key, &associated_data(key_id, algorithm), plaintext).map(Some)
    }

    async fn decrypt(
        &self,
        key_id: &KeyId,
        algorithm: EncryptionAlgorithm,
        ciphertext: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        self.check_algorithm(algorithm)?;
        let key = self.key_for(key_id, false)?;
        open(&key, &associated_data(key_id, algorithm), ciphertext).map(Some)
    }
}
