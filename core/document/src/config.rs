//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::engine::{EngineOptions, DEFAULT_CONCURRENCY};
use secenv_common::{Error, KeyId, Result};
use secenv_crypto::{
    CryptoProvider, EncryptionAlgorithm, ProviderRegistry, RetryConfig, RetryingProvider,
};

/// Config file name inside the secenv config directory.
pub const CONFIG_FILENAME: &str = "config.json";

/// Backoff applied to transient provider failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetrySettings {
    fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
    }
}

/// Provider selection and engine tuning, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecenvConfig {
    /// Registered provider name (e.g., "local", "memory").
    pub provider_type: String,
    /// Provider-specific configuration.
    #[serde(default)]
    pub provider_config: serde_json::Value,
    /// Key used for every provider call.
    pub key_id: KeyId,
    /// Preferred algorithm, as the provider names it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<EncryptionAlgorithm>,
    /// Cap on the payload of one provider call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload_bytes: Option<usize>,
    /// Keys processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Limit for a whole encrypt or decrypt call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySettings>,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl SecenvConfig {
    /// Create a configuration with default tuning.
    pub fn new(
        provider_type: impl Into<String>,
        provider_config: serde_json::Value,
        key_id: KeyId,
    ) -> Self {
        Self {
            provider_type: provider_type.into(),
            provider_config,
            key_id,
            algorithm: None,
            max_payload_bytes: None,
            concurrency: DEFAULT_CONCURRENCY,
            timeout_secs: None,
            retry: None,
        }
    }

    /// Default config location, `<config_dir>/secenv/config.json`.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::NotFound("No config directory for this platform".to_string()))?;
        Ok(dir.join("secenv").join(CONFIG_FILENAME))
    }

    /// Check values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.provider_type.trim().is_empty() {
            return Err(Error::InvalidInput("provider_type is empty".to_string()));
        }
        if self.concurrency == 0 {
            return Err(Error::InvalidInput("concurrency must be at least 1".to_string()));
        }
        if self.max_payload_bytes == Some(0) {
            return Err(Error::InvalidInput(
                "max_payload_bytes must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(Error::InvalidInput("timeout_secs must be at least 1".to_string()));
        }
        if let Some(retry) = &self.retry {
            if retry.initial_delay_ms > retry.max_delay_ms {
                return Err(Error::InvalidInput(
                    "retry.initial_delay_ms exceeds retry.max_delay_ms".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Engine options described by this configuration.
    pub fn engine_options(&self) -> EngineOptions {
        let mut options =
            EngineOptions::new(self.key_id.clone()).with_concurrency(self.concurrency);
        if let Some(algorithm) = self.algorithm {
            options = options.with_algorithm(algorithm);
        }
        if let Some(max) = self.max_payload_bytes {
            options = options.with_max_payload_bytes(max);
        }
        if let Some(secs) = self.timeout_secs {
            options = options.with_timeout(Duration::from_secs(secs));
        }
        options
    }

    /// Resolve the configured provider, wrapped for retries if configured.
    pub fn build_provider(&self, registry: &ProviderRegistry) -> Result<Arc<dyn CryptoProvider>> {
        let provider = registry.resolve(&self.provider_type, self.provider_config.clone())?;
        Ok(match &self.retry {
            Some(retry) if retry.max_retries > 0 => {
                Arc::new(RetryingProvider::new(provider, retry.to_retry_config()))
            }
            _ => provider,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading config");
        let json = tokio::fs::read_to_string(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("Config file not found: {}", path.display()))
            }
            _ => Error::Io(e),
        })?;
        Self::from_json(&json)
    }

    /// Write the configuration, creating parent directories.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_json()?).await?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secenv_crypto::create_default_registry;
    use serde_json::json;

    fn config() -> SecenvConfig {
        SecenvConfig::new("memory", json!({}), KeyId::new("k1").unwrap())
    }

    #[test]
    fn test_defaults_from_minimal_json() {
        let config =
            SecenvConfig::from_json(r#"{"provider_type":"memory","key_id":"k1"}"#).unwrap();
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.provider_config, serde_json::Value::Null);
        assert!(config.algorithm.is_none());
        assert!(config.retry.is_none());
    }

    #[test]
    fn test_algorithm_uses_provider_names() {
        let config = SecenvConfig::from_json(
            r#"{"provider_type":"memory","key_id":"k1","algorithm":"RSAES_OAEP_SHA_256"}"#,
        )
        .unwrap();
        assert_eq!(config.algorithm, Some(EncryptionAlgorithm::RsaesOaepSha256));
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());

        let mut bad = config();
        bad.concurrency = 0;
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.max_payload_bytes = Some(0);
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.retry = Some(RetrySettings {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 100,
        });
        assert!(bad.validate().is_err());

        assert!(SecenvConfig::from_json(r#"{"provider_type":"","key_id":"k1"}"#).is_err());
    }

    #[test]
    fn test_engine_options() {
        let mut config = config();
        config.max_payload_bytes = Some(100);
        config.timeout_secs = Some(30);
        config.concurrency = 4;

        let options = config.engine_options();
        assert_eq!(options.key_id.as_str(), "k1");
        assert_eq!(options.max_payload_bytes, Some(100));
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.concurrency, 4);
    }

    #[test]
    fn test_build_provider() {
        let registry = create_default_registry().unwrap();

        let mut config = config();
        assert_eq!(config.build_provider(&registry).unwrap().name(), "memory");

        config.retry = Some(RetrySettings {
            max_retries: 2,
            initial_delay_ms: 10,
            max_delay_ms: 100,
        });
        assert!(config.build_provider(&registry).is_ok());

        config.provider_type = "nope".to_string();
        assert!(config.build_provider(&registry).is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILENAME);

        let mut config = config();
        config.timeout_secs = Some(10);
        config.save(&path).await.unwrap();

        let loaded = SecenvConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = SecenvConfig::load(dir.path().join(CONFIG_FILENAME)).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
