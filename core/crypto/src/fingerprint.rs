//! Content fingerprints for change detection.
//!
//! A fingerprint travels next to the ciphertext in cleartext. It answers
//! "is this the same value as last time" and nothing else.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of the digest in bytes (256-bit).
pub const FINGERPRINT_LENGTH: usize = 32;

/// Hex-encoded BLAKE2b-256 digest of a value's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Get the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this looks like a digest produced by [`Fingerprint::of`].
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == FINGERPRINT_LENGTH * 2 && self.0.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Check whether `bytes` hash to this fingerprint.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        *self == Self::of(bytes)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(Fingerprint::of(b"bar"), Fingerprint::of(b"bar"));
        assert_ne!(Fingerprint::of(b"bar"), Fingerprint::of(b"baz"));
    }

    #[test]
    fn test_fixed_length_hex() {
        let fp = Fingerprint::of(b"");
        assert_eq!(fp.as_str().len(), FINGERPRINT_LENGTH * 2);
        assert!(fp.is_well_formed());

        let long = Fingerprint::of(&vec![0xAB; 10_000]);
        assert_eq!(long.as_str().len(), FINGERPRINT_LENGTH * 2);
    }

    #[test]
    fn test_matches() {
        let fp = Fingerprint::of("multi word".as_bytes());
        assert!(fp.matches(b"multi word"));
        assert!(!fp.matches(b"multi  word"));
    }
}
