//! Provider registry: selects a crypto backend by name at startup.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::local::LocalProvider;
use crate::memory::MemoryProvider;
use crate::provider::CryptoProvider;
use secenv_common::{Error, Result};

/// Factory function type for creating providers.
pub type ProviderFactory = Box<dyn Fn(Value) -> Result<Arc<dyn CryptoProvider>> + Send + Sync>;

/// Registry for crypto provider factories.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: ProviderFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Provider '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a provider by name and configuration.
    ///
    /// # Errors
    /// - Provider not registered
    /// - Configuration invalid for the provider
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn CryptoProvider>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Provider '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get sorted list of registered provider names.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider is registered.
    pub fn has_provider(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in providers.
///
/// - `memory`: no configuration
/// - `local`: `{"keyring": "<path to keyring file>"}`
pub fn create_default_registry() -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    registry.register(
        "memory",
        Box::new(|_config| Ok(Arc::new(MemoryProvider::new()))),
    )?;

    registry.register(
        "local",
        Box::new(|config| {
            let keyring = config
                .get("keyring")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::InvalidInput("Local provider requires 'keyring' path".to_string())
                })?;
            Ok(Arc::new(LocalProvider::from_keyring_file(keyring)?))
        }),
    )?;

    Ok(registry)
}
