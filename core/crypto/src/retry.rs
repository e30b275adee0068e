//! Opt-in retry with exponential backoff for transient provider errors.
//!
//! The engine never retries on its own. Callers that want retries wrap
//! their provider in [`RetryingProvider`].

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::profile::{EncryptionAlgorithm, KeyDescription};
use crate::provider::CryptoProvider;
use secenv_common::{KeyId, Result};

/// Growth factor between consecutive delays.
const BACKOFF_FACTOR: u32 = 2;

/// Backoff policy for transient provider failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Spread each delay by up to 25% either way.
    pub jitter: bool,
}

impl RetryConfig {
    /// Policy with `max_retries` retries starting at 200ms, capped at 10s.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let factor = BACKOFF_FACTOR.saturating_pow(retry.min(31));
        let delay = self.initial_delay.saturating_mul(factor).min(self.max_delay);

        if self.jitter {
            delay.mul_f64(0.75 + rand::random::<f64>() * 0.5)
        } else {
            delay
        }
    }
}

/// Runs provider calls under a [`RetryConfig`].
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `call`, retrying while it fails with a transient error.
    ///
    /// `label` names the provider call in logs. Terminal errors and the
    /// last transient error are returned as-is.
    pub async fn execute<F, Fut, T>(&self, label: &str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            let err = match call().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!(call = label, retries, "Provider call recovered");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };

            if retries >= self.config.max_retries {
                warn!(
                    call = label,
                    attempts = retries + 1,
                    error = %err,
                    "Giving up on provider call"
                );
                return Err(err);
            }

            let delay = self.config.delay_for_attempt(retries);
            retries += 1;
            warn!(
                call = label,
                retry = retries,
                ?delay,
                error = %err,
                "Retrying provider call"
            );
            sleep(delay).await;
        }
    }
}

/// Provider wrapper that retries transient failures of every call.
pub struct RetryingProvider {
    inner: Arc<dyn CryptoProvider>,
    executor: RetryExecutor,
}

impl RetryingProvider {
    /// Wrap `inner` with the given retry policy.
    pub fn new(inner: Arc<dyn CryptoProvider>, config: RetryConfig) -> Self {
        Self {
            inner,
            executor: RetryExecutor::new(config),
        }
    }
}

#[async_trait]
impl CryptoProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn describe_key(&self, key_id: &KeyId) -> Result<KeyDescription> {
        self.executor
            .execute("describe_key", || self.inner.describe_key(key_id))
            .await
    }

    async fn encrypt(
        &self,
        key_id: &KeyId,
        algorithm: EncryptionAlgorithm,
        plaintext: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        self.executor
            .execute("encrypt", || self.inner.encrypt(key_id, algorithm, plaintext))
            .await
    }

    async fn decrypt(
        &self,
        key_id: &KeyId,
        algorithm: EncryptionAlgorithm,
        ciphertext: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        self.executor
            .execute("decrypt", || self.inner.decrypt(key_id, algorithm, ciphertext))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProvider;
    use secenv_common::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` encrypt calls with the given error kind.
    struct Flaky {
        inner: MemoryProvider,
        failures: u32,
        transient: bool,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl CryptoProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn describe_key(&self, key_id: &KeyId) -> Result<KeyDescription> {
            self.inner.describe_key(key_id).await
        }

        async fn encrypt(
            &self,
            key_id: &KeyId,
            algorithm: EncryptionAlgorithm,
            plaintext: &[u8],
        ) -> Result<Option<Vec<u8>>> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(if self.transient {
                    Error::Network("connection reset".to_string())
                } else {
                    Error::CryptoProvider("access denied".to_string())
                });
            }
            self.inner.encrypt(key_id, algorithm, plaintext).await
        }

        async fn decrypt(
            &self,
            key_id: &KeyId,
            algorithm: EncryptionAlgorithm,
            ciphertext: &[u8],
        ) -> Result<Option<Vec<u8>>> {
            self.inner.decrypt(key_id, algorithm, ciphertext).await
        }
    }

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig::new(max_retries)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[test]
    fn test_retry_config_delay_calculation() {
        let config = RetryConfig::new(3)
            .with_initial_delay(Duration::from_secs(1))
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn test_max_delay_cap() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(8), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let flaky = Arc::new(Flaky {
            inner: MemoryProvider::new(),
            failures: 2,
            transient: true,
            attempts: AtomicU32::new(0),
        });
        let provider = RetryingProvider::new(flaky.clone(), fast(3));

        let result = provider
            .encrypt(
                &KeyId::new("k1").unwrap(),
                EncryptionAlgorithm::SymmetricDefault,
                b"v",
            )
            .await;

        assert!(result.unwrap().is_some());
        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_errors_are_not_retried() {
        let flaky = Arc::new(Flaky {
            inner: MemoryProvider::new(),
            failures: 1,
            transient: false,
            attempts: AtomicU32::new(0),
        });
        let provider = RetryingProvider::new(flaky.clone(), fast(3));

        let result = provider
            .encrypt(
                &KeyId::new("k1").unwrap(),
                EncryptionAlgorithm::SymmetricDefault,
                b"v",
            )
            .await;

        assert!(matches!(result, Err(Error::CryptoProvider(_))));
        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_retries_exceeded() {
        let flaky = Arc::new(Flaky {
            inner: MemoryProvider::new(),
            failures: u32::MAX,
            transient: true,
            attempts: AtomicU32::new(0),
        });
        let provider = RetryingProvider::new(flaky.clone(), fast(2));

        let result = provider
            .encrypt(
                &KeyId::new("k1").unwrap(),
                EncryptionAlgorithm::SymmetricDefault,
                b"v",
            )
            .await;

        assert!(matches!(result, Err(Error::Network(_))));
        // Initial + 2 retries
        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
    }
}
