//! Common error types for secenv.

use thiserror::Error;

/// Top-level error type for secenv operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// The remote key's spec or algorithm has no known payload bound.
    #[error("Unresolved key profile: {0}")]
    UnresolvedKeyProfile(String),

    /// A provider call succeeded but returned no payload.
    #[error("Crypto provider returned no {0}")]
    CryptoProviderEmptyResult(String),

    /// A provider call was rejected by the provider.
    #[error("Crypto provider error: {0}")]
    CryptoProvider(String),

    /// Transport-level failure talking to a provider.
    #[error("Network error: {0}")]
    Network(String),

    /// An envelope string could not be decoded.
    #[error("Envelope decode error: {0}")]
    EnvelopeDecode(String),

    /// Reassembled plaintext does not match the envelope fingerprint.
    #[error("Fingerprint mismatch for '{0}'")]
    FingerprintMismatch(String),

    /// The batch did not finish within the configured timeout.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Whether a retry may succeed where this attempt failed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
