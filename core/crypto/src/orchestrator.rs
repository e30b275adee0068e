//! Per-chunk provider calls for one value.
//!
//! Calls for the chunks of a value are issued concurrently; results are
//! collected by chunk index so output order always equals input order.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

use crate::chunker::split_payload;
use crate::profile::KeyProfile;
use crate::provider::CryptoProvider;
use secenv_common::{Error, KeyId, Result, SensitiveBytes};

/// Drives one provider call per chunk under a resolved key profile.
#[derive(Clone)]
pub struct ChunkCrypto {
    provider: Arc<dyn CryptoProvider>,
    key_id: KeyId,
    profile: KeyProfile,
}

impl ChunkCrypto {
    /// Create an orchestrator for `key_id` under `profile`.
    pub fn new(provider: Arc<dyn CryptoProvider>, key_id: KeyId, profile: KeyProfile) -> Self {
        Self {
            provider,
            key_id,
            profile,
        }
    }

    /// Get the resolved key profile.
    pub fn profile(&self) -> &KeyProfile {
        &self.profile
    }

    /// Encrypt each chunk, preserving order.
    ///
    /// [`seal`](Self::seal) splits under the payload bound before calling
    /// this, so the size check only trips for callers passing their own
    /// chunks. It runs before any provider call.
    ///
    /// # Errors
    /// - `InvalidInput` if a chunk exceeds the profile's payload bound
    /// - `CryptoProviderEmptyResult` if any call returns no ciphertext
    /// - Any provider error, which aborts the whole value
    pub async fn encrypt_chunks(&self, chunks: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        if let Some(oversized) = chunks
            .iter()
            .find(|c| c.len() > self.profile.max_payload_bytes)
        {
            return Err(Error::InvalidInput(format!(
                "chunk of {} bytes exceeds the {} byte payload bound",
                oversized.len(),
                self.profile.max_payload_bytes
            )));
        }

        let calls = chunks.iter().enumerate().map(|(index, chunk)| async move {
            self.provider
                .encrypt(&self.key_id, self.profile.algorithm, chunk)
                .await?
                .ok_or_else(|| {
                    Error::CryptoProviderEmptyResult(format!("ciphertext for chunk {}", index))
                })
        });
        try_join_all(calls).await
    }

    /// Decrypt each chunk, preserving order.
    ///
    /// # Errors
    /// - `CryptoProviderEmptyResult` if any call returns no plaintext
    /// - Any provider error; a failed chunk is never skipped
    pub async fn decrypt_chunks(&self, chunks: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        let calls = chunks.iter().enumerate().map(|(index, chunk)| async move {
            self.provider
                .decrypt(&self.key_id, self.profile.algorithm, chunk)
                .await?
                .ok_or_else(|| {
                    Error::CryptoProviderEmptyResult(format!("plaintext for chunk {}", index))
                })
        });
        try_join_all(calls).await
    }

    /// Split `plaintext` under the profile bound and encrypt every chunk.
    pub async fn seal(&self, plaintext: &[u8]) -> Result<Vec<Vec<u8>>> {
        let chunks = split_payload(plaintext, self.profile.max_payload_bytes)?;
        debug!(
            bytes = plaintext.len(),
            chunks = chunks.len(),
            "Encrypting value"
        );
        self.encrypt_chunks(&chunks).await
    }

    /// Decrypt every chunk and concatenate them in declared order.
    pub async fn open(&self, parts: &[Vec<u8>]) -> Result<SensitiveBytes> {
        debug!(chunks = parts.len(), "Decrypting value");
        let chunks = self.decrypt_chunks(parts).await?;
        Ok(SensitiveBytes::new(chunks.concat()))
    }
}
