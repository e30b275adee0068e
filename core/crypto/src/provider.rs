//! Crypto provider capability.

use async_trait::async_trait;

use crate::profile::{EncryptionAlgorithm, KeyDescription};
use secenv_common::{KeyId, Result};

/// Encryption backend holding the key material (a cloud KMS, a local keyring).
///
/// Every call handles exactly one bounded payload. `Ok(None)` means the
/// call succeeded but the provider returned no payload; callers treat
/// that as fatal for the value being processed.
#[async_trait]
pub trait CryptoProvider: Send + Sync {
    /// Get the provider name (e.g., "local", "memory").
    fn name(&self) -> &str;

    /// Look up a key's spec and the algorithms it supports.
    ///
    /// # Errors
    /// - Key not found
    /// - Network/authentication errors
    async fn describe_key(&self, key_id: &KeyId) -> Result<KeyDescription>;

    /// Encrypt one chunk.
    ///
    /// # Preconditions
    /// - `plaintext` fits the key profile's payload bound
    async fn encrypt(
        &self,
        key_id: &KeyId,
        algorithm: EncryptionAlgorithm,
        plaintext: &[u8],
    ) -> Result<Option<Vec<u8>>>;

    /// Decrypt one chunk produced by [`CryptoProvider::encrypt`].
    async fn decrypt(
        &self,
        key_id: &KeyId,
        algorithm: EncryptionAlgorithm,
        ciphertext: &[u8],
    ) -> Result<Option<Vec<u8>>>;
}
