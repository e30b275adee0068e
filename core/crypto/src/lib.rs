//! Cryptographic building blocks for secenv.
//!
//! This module provides:
//! - Content fingerprints for change detection
//! - Key profiles bounding the payload of a single provider call
//! - Payload chunking under that bound
//! - The `CryptoProvider` capability and per-chunk orchestration
//! - Local keyring and in-memory providers, a registry and a retry wrapper
//!
//! # Security Guarantees
//! - Key material is zeroized on drop and never printed
//! - No plaintext or key material is ever logged

pub mod aead;
pub mod chunker;
pub mod fingerprint;
pub mod keys;
pub mod local;
pub mod memory;
pub mod orchestrator;
pub mod profile;
pub mod provider;
pub mod registry;
pub mod retry;

pub use chunker::{chunk_count, split_payload};
pub use fingerprint::Fingerprint;
pub use keys::DataKey;
pub use local::{Keyring, LocalProvider};
pub use memory::MemoryProvider;
pub use orchestrator::ChunkCrypto;
pub use profile::{EncryptionAlgorithm, KeyDescription, KeyProfile, KeySpec};
pub use provider::CryptoProvider;
pub use registry::{create_default_registry, ProviderFactory, ProviderRegistry};
pub use retry::{RetryConfig, RetryExecutor, RetryingProvider};
