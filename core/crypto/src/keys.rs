//! Data keys held by the local keyring.
//!
//! Key material zeroizes on drop and is never printed.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{KeyInit, OsRng},
    XChaCha20Poly1305,
};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use secenv_common::{Error, Result};

/// Length of data keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Symmetric key used by the local provider.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    key: [u8; KEY_LENGTH],
}

impl DataKey {
    /// Create a data key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Generate a random data key.
    pub fn generate() -> Self {
        let generated = XChaCha20Poly1305::generate_key(&mut OsRng);
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&generated);
        Self { key }
    }

    /// Decode a data key from standard base64.
    ///
    /// # Errors
    /// - Returns error if the input is not base64 or not KEY_LENGTH bytes
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let mut decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidInput(format!("Key is not valid base64: {}", e)))?;
        if decoded.len() != KEY_LENGTH {
            let len = decoded.len();
            decoded.zeroize();
            return Err(Error::InvalidInput(format!(
                "Invalid key length: expected {}, got {}",
                KEY_LENGTH, len
            )));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { key })
    }

    /// Encode the key material as standard base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.key)
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_random() {
        let a = DataKey::generate();
        let b = DataKey::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_base64_roundtrip() {
        let key = DataKey::from_bytes([9u8; KEY_LENGTH]);
        let restored = DataKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(restored.as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let short = STANDARD.encode([1u8; 16]);
        assert!(DataKey::from_base64(&short).is_err());
        assert!(DataKey::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_debug_redacted() {
        let key = DataKey::generate();
        assert_eq!(format!("{:?}", key), "DataKey([REDACTED])");
    }
}
