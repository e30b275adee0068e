//! Key profiles: how many plaintext bytes one provider call may accept.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use secenv_common::{Error, KeyId, Result};

/// Type of a provider-held key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeySpec {
    SymmetricDefault,
    #[serde(rename = "RSA_2048")]
    Rsa2048,
    #[serde(rename = "RSA_3072")]
    Rsa3072,
    #[serde(rename = "RSA_4096")]
    Rsa4096,
    #[serde(rename = "SM2")]
    Sm2,
}

impl KeySpec {
    /// Wire name of the key spec.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeySpec::SymmetricDefault => "SYMMETRIC_DEFAULT",
            KeySpec::Rsa2048 => "RSA_2048",
            KeySpec::Rsa3072 => "RSA_3072",
            KeySpec::Rsa4096 => "RSA_4096",
            KeySpec::Sm2 => "SM2",
        }
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeySpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SYMMETRIC_DEFAULT" => Ok(KeySpec::SymmetricDefault),
            "RSA_2048" => Ok(KeySpec::Rsa2048),
            "RSA_3072" => Ok(KeySpec::Rsa3072),
            "RSA_4096" => Ok(KeySpec::Rsa4096),
            "SM2" => Ok(KeySpec::Sm2),
            other => Err(Error::UnresolvedKeyProfile(format!(
                "unsupported key spec '{}'",
                other
            ))),
        }
    }
}

/// Encryption algorithm negotiated with a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EncryptionAlgorithm {
    SymmetricDefault,
    #[serde(rename = "RSAES_OAEP_SHA_1")]
    RsaesOaepSha1,
    #[serde(rename = "RSAES_OAEP_SHA_256")]
    RsaesOaepSha256,
    #[serde(rename = "SM2PKE")]
    Sm2Pke,
}

impl EncryptionAlgorithm {
    /// Wire name of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionAlgorithm::SymmetricDefault => "SYMMETRIC_DEFAULT",
            EncryptionAlgorithm::RsaesOaepSha1 => "RSAES_OAEP_SHA_1",
            EncryptionAlgorithm::RsaesOaepSha256 => "RSAES_OAEP_SHA_256",
            EncryptionAlgorithm::Sm2Pke => "SM2PKE",
        }
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SYMMETRIC_DEFAULT" => Ok(EncryptionAlgorithm::SymmetricDefault),
            "RSAES_OAEP_SHA_1" => Ok(EncryptionAlgorithm::RsaesOaepSha1),
            "RSAES_OAEP_SHA_256" => Ok(EncryptionAlgorithm::RsaesOaepSha256),
            "SM2PKE" => Ok(EncryptionAlgorithm::Sm2Pke),
            other => Err(Error::UnresolvedKeyProfile(format!(
                "unsupported encryption algorithm '{}'",
                other
            ))),
        }
    }
}

/// Maximum plaintext bytes a single call accepts for a spec/algorithm pair.
pub fn max_payload_bytes(spec: KeySpec, algorithm: EncryptionAlgorithm) -> Option<usize> {
    use EncryptionAlgorithm as A;
    use KeySpec as K;

    match (spec, algorithm) {
        (K::SymmetricDefault, A::SymmetricDefault) => Some(4096),
        (K::Rsa2048, A::RsaesOaepSha1) => Some(214),
        (K::Rsa2048, A::RsaesOaepSha256) => Some(190),
        (K::Rsa3072, A::RsaesOaepSha1) => Some(342),
        (K::Rsa3072, A::RsaesOaepSha256) => Some(318),
        (K::Rsa4096, A::RsaesOaepSha1) => Some(470),
        (K::Rsa4096, A::RsaesOaepSha256) => Some(446),
        (K::Sm2, A::Sm2Pke) => Some(1024),
        _ => None,
    }
}

/// Result of a provider's key lookup.
///
/// Spec and algorithms stay as raw strings; a provider may report values
/// this crate does not know, which only matters once a profile is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescription {
    pub key_id: KeyId,
    pub key_spec: String,
    pub encryption_algorithms: Vec<String>,
}

/// Resolved payload bound for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyProfile {
    pub key_spec: KeySpec,
    pub algorithm: EncryptionAlgorithm,
    pub max_payload_bytes: usize,
}

impl KeyProfile {
    /// Resolve the profile for a described key.
    ///
    /// With a `preferred` algorithm, the key must support it. Otherwise the
    /// first reported algorithm with a table entry for the key spec wins.
    ///
    /// # Errors
    /// - `UnresolvedKeyProfile` if the key spec or every candidate algorithm is unknown
    pub fn resolve(
        description: &KeyDescription,
        preferred: Option<EncryptionAlgorithm>,
    ) -> Result<Self> {
        let key_spec: KeySpec = description.key_spec.parse()?;

        let candidates: Vec<EncryptionAlgorithm> = description
            .encryption_algorithms
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();

        let algorithm = match preferred {
            Some(algorithm) => {
                if !candidates.contains(&algorithm) {
                    return Err(Error::UnresolvedKeyProfile(format!(
                        "key {} does not support {}",
                        description.key_id, algorithm
                    )));
                }
                algorithm
            }
            None => candidates
                .into_iter()
                .find(|algorithm| max_payload_bytes(key_spec, *algorithm).is_some())
                .ok_or_else(|| {
                    Error::UnresolvedKeyProfile(format!(
                        "no usable algorithm for {} key {}",
                        key_spec, description.key_id
                    ))
                })?,
        };

        let max_payload_bytes = max_payload_bytes(key_spec, algorithm).ok_or_else(|| {
            Error::UnresolvedKeyProfile(format!("{} cannot be used with {}", algorithm, key_spec))
        })?;

        Ok(Self {
            key_spec,
            algorithm,
            max_payload_bytes,
        })
    }

    /// Lower the payload bound to `cap`; a cap above the bound has no effect.
    pub fn capped(mut self, cap: Option<usize>) -> Self {
        if let Some(cap) = cap {
            self.max_payload_bytes = self.max_payload_bytes.min(cap);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn describe(spec: &str, algorithms: &[&str]) -> KeyDescription {
        KeyDescription {
            key_id: KeyId::new("k1").unwrap(),
            key_spec: spec.to_string(),
            encryption_algorithms: algorithms.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_symmetric_profile() {
        let profile =
            KeyProfile::resolve(&describe("SYMMETRIC_DEFAULT", &["SYMMETRIC_DEFAULT"]), None)
                .unwrap();
        assert_eq!(profile.max_payload_bytes, 4096);
    }

    #[test]
    fn test_rsa_first_supported_algorithm() {
        let profile = KeyProfile::resolve(
            &describe("RSA_2048", &["RSAES_OAEP_SHA_1", "RSAES_OAEP_SHA_256"]),
            None,
        )
        .unwrap();
        assert_eq!(profile.algorithm, EncryptionAlgorithm::RsaesOaepSha1);
        assert_eq!(profile.max_payload_bytes, 214);
    }

    #[test]
    fn test_preferred_algorithm() {
        let profile = KeyProfile::resolve(
            &describe("RSA_4096", &["RSAES_OAEP_SHA_1", "RSAES_OAEP_SHA_256"]),
            Some(EncryptionAlgorithm::RsaesOaepSha256),
        )
        .unwrap();
        assert_eq!(profile.max_payload_bytes, 446);
    }

    #[test]
    fn test_preferred_algorithm_not_supported() {
        let result = KeyProfile::resolve(
            &describe("RSA_2048", &["RSAES_OAEP_SHA_1"]),
            Some(EncryptionAlgorithm::RsaesOaepSha256),
        );
        assert!(matches!(result, Err(Error::UnresolvedKeyProfile(_))));
    }

    #[test]
    fn test_unknown_spec_is_unresolved() {
        let result = KeyProfile::resolve(&describe("ECC_NIST_P256", &["ECDSA"]), None);
        assert!(matches!(result, Err(Error::UnresolvedKeyProfile(_))));
    }

    #[test]
    fn test_mismatched_algorithm_is_unresolved() {
        let result = KeyProfile::resolve(&describe("RSA_2048", &["SYMMETRIC_DEFAULT"]), None);
        assert!(matches!(result, Err(Error::UnresolvedKeyProfile(_))));
    }

    #[test]
    fn test_cap_only_lowers() {
        let profile =
            KeyProfile::resolve(&describe("SYMMETRIC_DEFAULT", &["SYMMETRIC_DEFAULT"]), None)
                .unwrap();
        assert_eq!(profile.capped(Some(100)).max_payload_bytes, 100);
        assert_eq!(profile.capped(Some(10_000)).max_payload_bytes, 4096);
        assert_eq!(profile.capped(None).max_payload_bytes, 4096);
    }

    #[test]
    fn test_wire_names_roundtrip() {
        for spec in ["SYMMETRIC_DEFAULT", "RSA_2048", "RSA_3072", "RSA_4096", "SM2"] {
            assert_eq!(spec.parse::<KeySpec>().unwrap().as_str(), spec);
        }
        let json = serde_json::to_string(&EncryptionAlgorithm::RsaesOaepSha256).unwrap();
        assert_eq!(json, "\"RSAES_OAEP_SHA_256\"");
    }
}
