//! Change-aware encryption of env-style documents.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, Instrument};

use crate::document::{Block, Document, Entry};
use crate::envelope::Envelope;
use secenv_common::{Error, KeyId, Result};
use secenv_crypto::{ChunkCrypto, CryptoProvider, EncryptionAlgorithm, Fingerprint, KeyProfile};

/// Default number of keys processed concurrently.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Options for a [`SecretFileEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Key used for every provider call.
    pub key_id: KeyId,
    /// Preferred algorithm; the first usable one the key reports otherwise.
    pub algorithm: Option<EncryptionAlgorithm>,
    /// Upper bound on the payload of one call, below the key profile's own.
    pub max_payload_bytes: Option<usize>,
    /// Maximum number of keys processed concurrently.
    pub concurrency: usize,
    /// Limit for a whole encrypt or decrypt call.
    pub timeout: Option<Duration>,
}

impl EngineOptions {
    pub fn new(key_id: KeyId) -> Self {
        Self {
            key_id,
            algorithm: None,
            max_payload_bytes: None,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: None,
        }
    }

    pub fn with_algorithm(mut self, algorithm: EncryptionAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = Some(max);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Converts `.env` text to `.sec` text and back.
///
/// Every entry value is replaced by a quoted envelope holding the
/// fingerprint and ciphertext chunks of the value as written. Comments,
/// blank lines, unrecognized lines and ordering are kept as they are.
///
/// A call either produces a complete document or fails: any provider
/// failure, empty provider result or malformed envelope aborts it.
pub struct SecretFileEngine {
    provider: Arc<dyn CryptoProvider>,
    options: EngineOptions,
}

impl SecretFileEngine {
    /// Create an engine calling `provider` with `options`.
    pub fn new(provider: Arc<dyn CryptoProvider>, options: EngineOptions) -> Self {
        Self { provider, options }
    }

    /// Get the engine options.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Encrypt a plaintext document.
    ///
    /// With `previous`, an entry whose value still matches the fingerprint
    /// of an envelope stored under the same key in `previous` keeps that
    /// envelope verbatim and costs no provider call.
    ///
    /// # Errors
    /// - `UnresolvedKeyProfile` before any encrypt call if the key cannot be used
    /// - `CryptoProviderEmptyResult` or `CryptoProvider` from any chunk
    /// - `Timeout` if the call exceeds the configured limit
    pub async fn encrypt(&self, plaintext: &str, previous: Option<&str>) -> Result<String> {
        let span = info_span!(
            "secenv.encrypt",
            provider = self.provider.name(),
            key_id = %self.options.key_id
        );
        self.with_timeout("encrypt", self.encrypt_document(plaintext, previous))
            .instrument(span)
            .await
    }

    /// Decrypt a `.sec` document.
    ///
    /// # Errors
    /// - `EnvelopeDecode` if an entry does not hold an envelope
    /// - `FingerprintMismatch` if the reassembled value does not match its envelope
    /// - `CryptoProviderEmptyResult` or `CryptoProvider` from any chunk
    /// - `Timeout` if the call exceeds the configured limit
    pub async fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let span = info_span!(
            "secenv.decrypt",
            provider = self.provider.name(),
            key_id = %self.options.key_id
        );
        self.with_timeout("decrypt", self.decrypt_document(ciphertext))
            .instrument(span)
            .await
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
                Error::Timeout(format!("{} did not finish within {:?}", operation, limit))
            })?,
            None => work.await,
        }
    }

    async fn chunk_crypto(&self) -> Result<ChunkCrypto> {
        let description = self.provider.describe_key(&self.options.key_id).await?;
        let profile = KeyProfile::resolve(&description, self.options.algorithm)?
            .capped(self.options.max_payload_bytes);

        debug!(
            key_spec = %profile.key_spec,
            algorithm = %profile.algorithm,
            max_payload_bytes = profile.max_payload_bytes,
            "Resolved key profile"
        );

        Ok(ChunkCrypto::new(
            self.provider.clone(),
            self.options.key_id.clone(),
            profile,
        ))
    }

    async fn encrypt_document(&self, plaintext: &str, previous: Option<&str>) -> Result<String> {
        let document = Document::parse(plaintext);
        let baseline = previous.map(Baseline::parse).unwrap_or_default();

        let mut literals = HashMap::new();
        let mut pending: Vec<(usize, &Entry)> = Vec::new();
        for (index, entry) in indexed_entries(&document) {
            match baseline.reusable(entry) {
                Some(literal) => {
                    debug!(key = %entry.key(), "Value unchanged, keeping envelope");
                    literals.insert(index, literal.to_string());
                }
                None => pending.push((index, entry)),
            }
        }

        let reused = literals.len();
        let crypto = if pending.iter().any(|(_, entry)| !entry.literal().is_empty()) {
            Some(self.chunk_crypto().await?)
        } else {
            None
        };
        let crypto = crypto.as_ref();

        let sealed: Vec<(usize, String)> = stream::iter(pending)
            .map(|(index, entry)| async move {
                let literal = seal_literal(crypto, entry.literal())
                    .await
                    .map_err(|e| for_key(entry.key(), e))?;
                Ok::<_, Error>((index, literal))
            })
            .buffered(self.options.concurrency.max(1))
            .try_collect::<Vec<_>>()
            .await?;

        info!(
            entries = reused + sealed.len(),
            reused,
            encrypted = sealed.len(),
            "Encrypted document"
        );

        literals.extend(sealed);
        Ok(render(&document, literals))
    }

    async fn decrypt_document(&self, ciphertext: &str) -> Result<String> {
        let document = Document::parse(ciphertext);
        reject_stray_envelopes(&document)?;

        let mut pending = Vec::new();
        for (index, entry) in indexed_entries(&document) {
            let envelope = Envelope::decode(entry.value()).map_err(|e| for_key(entry.key(), e))?;
            pending.push((index, entry, envelope));
        }

        let crypto = if pending.iter().any(|(_, _, envelope)| !envelope.parts.is_empty()) {
            Some(self.chunk_crypto().await?)
        } else {
            None
        };
        let crypto = crypto.as_ref();

        let opened: Vec<(usize, String)> = stream::iter(pending)
            .map(|(index, entry, envelope)| async move {
                let literal = open_envelope(crypto, entry.key(), &envelope)
                    .await
                    .map_err(|e| for_key(entry.key(), e))?;
                Ok::<_, Error>((index, literal))
            })
            .buffered(self.options.concurrency.max(1))
            .try_collect::<Vec<_>>()
            .await?;

        info!(entries = opened.len(), "Decrypted document");

        Ok(render(&document, opened.into_iter().collect()))
    }
}

/// Envelopes of a previous `.sec` document, by key.
#[derive(Default)]
struct Baseline {
    envelopes: HashMap<String, Vec<(Fingerprint, String)>>,
}

impl Baseline {
    /// Collect decodable envelopes; anything else just means "re-encrypt".
    fn parse(text: &str) -> Self {
        let mut envelopes: HashMap<String, Vec<(Fingerprint, String)>> = HashMap::new();
        for entry in Document::parse(text).entries() {
            match Envelope::decode(entry.value()) {
                Ok(envelope) => envelopes
                    .entry(entry.key().to_string())
                    .or_default()
                    .push((envelope.hash, entry.literal().to_string())),
                Err(e) => debug!(key = %entry.key(), error = %e, "Ignoring previous value"),
            }
        }
        Self { envelopes }
    }

    fn reusable(&self, entry: &Entry) -> Option<&str> {
        let fingerprint = Fingerprint::of(entry.literal().as_bytes());
        self.envelopes
            .get(entry.key())?
            .iter()
            .find(|(hash, _)| *hash == fingerprint)
            .map(|(_, literal)| literal.as_str())
    }
}

fn indexed_entries(document: &Document) -> impl Iterator<Item = (usize, &Entry)> {
    document
        .blocks()
        .iter()
        .enumerate()
        .filter_map(|(index, block)| match block {
            Block::Entry(entry) => Some((index, entry)),
            _ => None,
        })
}

/// Fail on an envelope sitting in a line that did not parse as an entry.
fn reject_stray_envelopes(document: &Document) -> Result<()> {
    let mut line = 1;
    for block in document.blocks() {
        let raw = block.raw();
        if matches!(block, Block::Unrecognized(_)) && Envelope::appears_in(&raw) {
            return Err(Error::EnvelopeDecode(format!(
                "line {}: envelope outside a recognized entry",
                line
            )));
        }
        line += raw.matches('\n').count();
    }
    Ok(())
}

async fn seal_literal(crypto: Option<&ChunkCrypto>, literal: &str) -> Result<String> {
    let hash = Fingerprint::of(literal.as_bytes());
    let parts = match crypto {
        Some(crypto) if !literal.is_empty() => crypto.seal(literal.as_bytes()).await?,
        _ => Vec::new(),
    };
    Envelope::new(hash, &parts).to_literal()
}

async fn open_envelope(
    crypto: Option<&ChunkCrypto>,
    key: &str,
    envelope: &Envelope,
) -> Result<String> {
    let ciphertexts = envelope.ciphertexts()?;
    let plaintext = match crypto {
        Some(crypto) if !ciphertexts.is_empty() => {
            let opened = crypto.open(&ciphertexts).await?;
            opened.as_bytes().to_vec()
        }
        _ => Vec::new(),
    };

    if !envelope.hash.matches(&plaintext) {
        return Err(Error::FingerprintMismatch(key.to_string()));
    }

    String::from_utf8(plaintext)
        .map_err(|_| Error::Crypto("decrypted value is not valid UTF-8".to_string()))
}

/// Attach the entry key to errors whose message would otherwise lack it.
fn for_key(key: &str, err: Error) -> Error {
    match err {
        Error::CryptoProviderEmptyResult(m) => {
            Error::CryptoProviderEmptyResult(format!("{} for '{}'", m, key))
        }
        Error::CryptoProvider(m) => Error::CryptoProvider(format!("'{}': {}", key, m)),
        Error::Crypto(m) => Error::Crypto(format!("'{}': {}", key, m)),
        Error::EnvelopeDecode(m) => Error::EnvelopeDecode(format!("'{}': {}", key, m)),
        Error::InvalidInput(m) => Error::InvalidInput(format!("'{}': {}", key, m)),
        other => other,
    }
}

/// Reassemble the document, replacing the literal of each entry in `literals`.
fn render(document: &Document, mut literals: HashMap<usize, String>) -> String {
    let mut out = String::new();
    for (index, block) in document.blocks().iter().enumerate() {
        match (block, literals.remove(&index)) {
            (Block::Entry(entry), Some(literal)) => out.push_str(&entry.render_with(&literal)),
            _ => out.push_str(&block.raw()),
        }
    }
    out
}
