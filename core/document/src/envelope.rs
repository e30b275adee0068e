//! Envelope codec: the ciphertext of one value, embedded as a quoted literal.
//!
//! Wire format is `{"hash":"<fingerprint>","parts":["<base64>",...]}` with
//! every double quote backslash-escaped, wrapped in double quotes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use secenv_common::{Error, Result};
use secenv_crypto::Fingerprint;

const ESCAPED_MARKER: &str = "{\\\"hash\\\":";
const PLAIN_MARKER: &str = "{\"hash\":";

/// Fingerprint and ordered ciphertext chunks of one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub hash: Fingerprint,
    pub parts: Vec<String>,
}

impl Envelope {
    /// Build an envelope from raw ciphertext chunks.
    pub fn new(hash: Fingerprint, ciphertexts: &[Vec<u8>]) -> Self {
        Self {
            hash,
            parts: ciphertexts.iter().map(|c| STANDARD.encode(c)).collect(),
        }
    }

    /// Serialize to the escaped form that fits inside `"..."`.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(json.replace('"', "\\\""))
    }

    /// Serialize to a complete double-quoted literal.
    pub fn to_literal(&self) -> Result<String> {
        Ok(format!("\"{}\"", self.encode()?))
    }

    /// Parse an encoded envelope. Accepts the escaped and the plain JSON form.
    ///
    /// # Errors
    /// - `EnvelopeDecode` if the text is not an envelope or the hash is malformed
    pub fn decode(encoded: &str) -> Result<Self> {
        let json = encoded.trim().replace("\\\"", "\"");
        let envelope: Envelope = serde_json::from_str(&json)
            .map_err(|e| Error::EnvelopeDecode(format!("not an envelope: {}", e)))?;
        if !envelope.hash.is_well_formed() {
            return Err(Error::EnvelopeDecode("malformed fingerprint".to_string()));
        }
        Ok(envelope)
    }

    /// Whether `text` carries an encoded envelope, escaped or plain.
    pub fn appears_in(text: &str) -> bool {
        text.contains(ESCAPED_MARKER) || text.contains(PLAIN_MARKER)
    }

    /// Decode the base64 parts in declared order.
    ///
    /// # Errors
    /// - `EnvelopeDecode` if any part is not valid base64
    pub fn ciphertexts(&self) -> Result<Vec<Vec<u8>>> {
        self.parts
            .iter()
            .enumerate()
            .map(|(index, part)| {
                STANDARD
                    .decode(part)
                    .map_err(|e| Error::EnvelopeDecode(format!("part {}: {}", index, e)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn sample() -> Envelope {
        Envelope::new(
            Fingerprint::of(b"bar"),
            &[vec![1, 2, 3], vec![250, 251, 252, 253]],
        )
    }

    #[test]
    fn test_encode_escapes_quotes() {
        let envelope = sample();
        let encoded = envelope.encode().unwrap();

        assert!(encoded.starts_with("{\\\"hash\\\":\\\""));
        assert!(!encoded.replace("\\\"", "").contains('"'));
        assert_eq!(Envelope::decode(&encoded).unwrap(), envelope);
    }

    #[test]
    fn test_decode_plain_json() {
        let envelope = sample();
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(Envelope::decode(&json).unwrap(), envelope);
    }

    #[test]
    fn test_literal_survives_tokenizer() {
        let envelope = sample();
        let text = format!("FOO={}\n", envelope.to_literal().unwrap());
        let doc = Document::parse(&text);
        let entry = doc.get("FOO").unwrap();

        assert_eq!(Envelope::decode(entry.value()).unwrap(), envelope);
        assert_eq!(doc.to_string(), text);
    }

    #[test]
    fn test_parts_keep_declared_order() {
        let envelope = sample();
        assert_eq!(
            envelope.ciphertexts().unwrap(),
            vec![vec![1, 2, 3], vec![250, 251, 252, 253]]
        );
    }

    #[test]
    fn test_zero_parts() {
        let envelope = Envelope::new(Fingerprint::of(b""), &[]);
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert!(decoded.parts.is_empty());
        assert!(decoded.ciphertexts().unwrap().is_empty());
    }

    #[test]
    fn test_appears_in() {
        let literal = sample().to_literal().unwrap();
        assert!(Envelope::appears_in(&format!("HOST:{}\n", literal)));
        assert!(Envelope::appears_in(&serde_json::to_string(&sample()).unwrap()));
        assert!(!Envelope::appears_in("HOST:example.com\n"));
        assert!(!Envelope::appears_in("# hash: not an envelope\n"));
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(
            Envelope::decode("plain value"),
            Err(Error::EnvelopeDecode(_))
        ));
        assert!(matches!(
            Envelope::decode(r#"{"hash":"xyz","parts":[]}"#),
            Err(Error::EnvelopeDecode(_))
        ));

        let bad_part = Envelope {
            hash: Fingerprint::of(b"x"),
            parts: vec!["***".to_string()],
        };
        assert!(matches!(bad_part.ciphertexts(), Err(Error::EnvelopeDecode(_))));
    }
}
