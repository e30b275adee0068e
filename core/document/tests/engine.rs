use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use secenv_common::{Error, KeyId, Result};
use secenv_crypto::{
    CryptoProvider, EncryptionAlgorithm, KeyDescription, KeySpec, MemoryProvider,
    ProviderRegistry,
};
use secenv_document::{
    Document, EngineOptions, Envelope, RetrySettings, SecenvConfig, SecretFileEngine,
};

const SAMPLE: &str = "\
# Service settings
export DATABASE_URL=postgres://user:pw@localhost/db # primary

API_KEY=\"sk-123 \\\"quoted\\\"\"
GREETING='hello # not a comment'
HOST: db.internal
export PORT:\t5432 # colon form
PEM=\"-----BEGIN KEY-----
abc
-----END KEY-----\"
EMPTY=
  SPACED =  value with spaces   # trailing
this line is not an assignment
LAST=no-newline";

#[derive(Clone, Copy)]
enum Fault {
    Healthy,
    EmptyEncrypt,
    FailDecrypt,
    SlowEncrypt(Duration),
    NetworkOnce,
}

/// Memory provider wrapper counting key lookups and injecting failures.
struct Faulty {
    inner: MemoryProvider,
    fault: Fault,
    describe_calls: AtomicUsize,
    encrypt_attempts: AtomicUsize,
}

impl Faulty {
    fn new(inner: MemoryProvider, fault: Fault) -> Self {
        Self {
            inner,
            fault,
            describe_calls: AtomicUsize::new(0),
            encrypt_attempts: AtomicUsize::new(0),
        }
    }

    fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    fn encrypt_attempts(&self) -> usize {
        self.encrypt_attempts.load(Ordering::SeqCst)
    }

    fn remote_calls(&self) -> usize {
        self.describe_calls() + self.inner.encrypt_calls() + self.inner.decrypt_calls()
    }
}

#[async_trait]
impl CryptoProvider for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn describe_key(&self, key_id: &KeyId) -> Result<KeyDescription> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.describe_key(key_id).await
    }

    async fn encrypt(
        &self,
        key_id: &KeyId,
        algorithm: EncryptionAlgorithm,
        plaintext: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let attempt = self.encrypt_attempts.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            Fault::NetworkOnce if attempt == 0 => {
                Err(Error::Network("connection reset".to_string()))
            }
            Fault::EmptyEncrypt => {
                self.inner.encrypt(key_id, algorithm, plaintext).await?;
                Ok(None)
            }
            Fault::SlowEncrypt(delay) => {
                tokio::time::sleep(delay).await;
                self.inner.encrypt(key_id, algorithm, plaintext).await
            }
            _ => self.inner.encrypt(key_id, algorithm, plaintext).await,
        }
    }

    async fn decrypt(
        &self,
        key_id: &KeyId,
        algorithm: EncryptionAlgorithm,
        ciphertext: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        if let Fault::FailDecrypt = self.fault {
            return Err(Error::CryptoProvider("access denied".to_string()));
        }
        self.inner.decrypt(key_id, algorithm, ciphertext).await
    }
}

fn key() -> KeyId {
    KeyId::new("alias/app").unwrap()
}

fn setup(fault: Fault, max_payload_bytes: Option<usize>) -> (Arc<Faulty>, SecretFileEngine) {
    let provider = Arc::new(Faulty::new(MemoryProvider::new(), fault));
    let mut options = EngineOptions::new(key());
    if let Some(max) = max_payload_bytes {
        options = options.with_max_payload_bytes(max);
    }
    let engine = SecretFileEngine::new(provider.clone(), options);
    (provider, engine)
}

fn envelope_of(sec: &str, key: &str) -> Envelope {
    let doc = Document::parse(sec);
    Envelope::decode(doc.get(key).unwrap().value()).unwrap()
}

#[tokio::test]
async fn test_round_trip_is_byte_identical() {
    let (_, engine) = setup(Fault::Healthy, None);

    let sec = engine.encrypt(SAMPLE, None).await.unwrap();
    assert!(sec.starts_with("# Service settings\nexport DATABASE_URL=\"{"));
    assert!(sec.contains("\n\nAPI_KEY=\"{"));
    assert!(sec.contains("\nthis line is not an assignment\n"));
    assert!(sec.contains("\nHOST: \"{"));
    assert!(sec.contains("\nexport PORT:\t\"{"));
    assert!(!sec.contains("db.internal"));
    assert!(!sec.contains("postgres://"));
    assert!(!sec.contains("BEGIN KEY"));

    assert_eq!(engine.decrypt(&sec).await.unwrap(), SAMPLE);
}

#[tokio::test]
async fn test_reencrypting_unchanged_document_makes_no_calls() {
    let (provider, engine) = setup(Fault::Healthy, None);

    let sec = engine.encrypt(SAMPLE, None).await.unwrap();
    let before = provider.remote_calls();

    let again = engine.encrypt(SAMPLE, Some(&sec)).await.unwrap();
    assert_eq!(again, sec);
    assert_eq!(provider.remote_calls(), before);
}

#[tokio::test]
async fn test_only_changed_key_is_reencrypted() {
    let (provider, engine) = setup(Fault::Healthy, None);

    let original = "A=one\nB=two\nC=three\n";
    let sec = engine.encrypt(original, None).await.unwrap();
    let calls = provider.inner.encrypt_calls();

    let changed = engine
        .encrypt("A=one\nB=TWO\nC=three\n", Some(&sec))
        .await
        .unwrap();
    assert_eq!(provider.inner.encrypt_calls(), calls + 1);

    let old: Vec<&str> = sec.lines().collect();
    let new: Vec<&str> = changed.lines().collect();
    assert_eq!(old[0], new[0]);
    assert_ne!(old[1], new[1]);
    assert_eq!(old[2], new[2]);

    assert_eq!(
        engine.decrypt(&changed).await.unwrap(),
        "A=one\nB=TWO\nC=three\n"
    );
}

#[tokio::test]
async fn test_chunk_count_follows_payload_bound() {
    let (provider, engine) = setup(Fault::Healthy, Some(100));

    let text = format!("BIG={}\n", "x".repeat(250));
    let sec = engine.encrypt(&text, None).await.unwrap();

    assert_eq!(provider.inner.encrypt_calls(), 3);
    assert_eq!(envelope_of(&sec, "BIG").parts.len(), 3);

    assert_eq!(engine.decrypt(&sec).await.unwrap(), text);
    assert_eq!(provider.inner.decrypt_calls(), 3);
}

#[tokio::test]
async fn test_empty_value_has_zero_chunks() {
    let (provider, engine) = setup(Fault::Healthy, Some(100));

    let sec = engine.encrypt("EMPTY=\n", None).await.unwrap();

    assert_eq!(provider.remote_calls(), 0);
    assert!(envelope_of(&sec, "EMPTY").parts.is_empty());
    assert_eq!(engine.decrypt(&sec).await.unwrap(), "EMPTY=\n");
}

#[tokio::test]
async fn test_two_keys_one_comment() {
    let (provider, engine) = setup(Fault::Healthy, Some(100));

    let text = "FOO=bar\n# comment\nBAZ=\"multi word\"";
    let sec = engine.encrypt(text, None).await.unwrap();

    assert_eq!(provider.inner.encrypt_calls(), 2);
    let lines: Vec<&str> = sec.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("FOO=\"{") && lines[0].ends_with("}\""));
    assert_eq!(lines[1], "# comment");
    assert!(lines[2].starts_with("BAZ=\"{") && lines[2].ends_with("}\""));

    let plain = engine.decrypt(&sec).await.unwrap();
    assert_eq!(plain, text);
    assert!(plain.contains("FOO=bar\n"));
    assert!(plain.contains("BAZ=\"multi word\""));
}

#[tokio::test]
async fn test_reordered_parts_are_rejected() {
    let (_, engine) = setup(Fault::Healthy, Some(100));

    let value: String = (0..250).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let sec = engine
        .encrypt(&format!("BIG={}\n", value), None)
        .await
        .unwrap();

    let mut envelope = envelope_of(&sec, "BIG");
    envelope.parts.swap(0, 1);
    let tampered = format!("BIG={}\n", envelope.to_literal().unwrap());

    match engine.decrypt(&tampered).await {
        Err(Error::FingerprintMismatch(key)) => assert_eq!(key, "BIG"),
        other => panic!("expected fingerprint mismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn test_identical_values_under_different_keys() {
    let (provider, engine) = setup(Fault::Healthy, None);

    let sec = engine.encrypt("A=same\nB=same\n", None).await.unwrap();
    assert_eq!(provider.inner.encrypt_calls(), 2);

    let changed = engine
        .encrypt("A=other\nB=same\n", Some(&sec))
        .await
        .unwrap();
    assert_eq!(provider.inner.encrypt_calls(), 3);
    assert_eq!(changed.lines().nth(1), sec.lines().nth(1));

    assert_eq!(
        engine.decrypt(&changed).await.unwrap(),
        "A=other\nB=same\n"
    );
}

#[tokio::test]
async fn test_previous_envelope_of_other_key_is_not_reused() {
    let (provider, engine) = setup(Fault::Healthy, None);

    let sec = engine.encrypt("A=value\n", None).await.unwrap();
    let calls = provider.inner.encrypt_calls();

    engine.encrypt("B=value\n", Some(&sec)).await.unwrap();
    assert_eq!(provider.inner.encrypt_calls(), calls + 1);
}

#[tokio::test]
async fn test_unresolvable_key_fails_before_any_call() {
    let inner = MemoryProvider::with_key_spec(KeySpec::Rsa2048, vec![EncryptionAlgorithm::Sm2Pke]);
    let provider = Arc::new(Faulty::new(inner, Fault::Healthy));
    let engine = SecretFileEngine::new(provider.clone(), EngineOptions::new(key()));

    let result = engine.encrypt("A=1\n", None).await;
    assert!(matches!(result, Err(Error::UnresolvedKeyProfile(_))));
    assert_eq!(provider.inner.encrypt_calls(), 0);
}

#[tokio::test]
async fn test_rsa_key_uses_its_payload_bound() {
    let inner = MemoryProvider::with_key_spec(
        KeySpec::Rsa2048,
        vec![
            EncryptionAlgorithm::RsaesOaepSha1,
            EncryptionAlgorithm::RsaesOaepSha256,
        ],
    );
    let provider = Arc::new(Faulty::new(inner, Fault::Healthy));
    let options = EngineOptions::new(key()).with_algorithm(EncryptionAlgorithm::RsaesOaepSha256);
    let engine = SecretFileEngine::new(provider.clone(), options);

    let text = format!("CERT={}\n", "z".repeat(400));
    let sec = engine.encrypt(&text, None).await.unwrap();

    // 190 + 190 + 20
    assert_eq!(provider.inner.encrypt_calls(), 3);
    assert_eq!(engine.decrypt(&sec).await.unwrap(), text);
}

#[tokio::test]
async fn test_empty_provider_result_is_fatal() {
    let (_, engine) = setup(Fault::EmptyEncrypt, None);

    match engine.encrypt("A=1\nB=2\n", None).await {
        Err(Error::CryptoProviderEmptyResult(message)) => assert!(message.contains("'A'")),
        other => panic!("expected empty result error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_decrypt_failure_is_fatal() {
    let memory = Arc::new(MemoryProvider::new());
    let sec = SecretFileEngine::new(memory, EngineOptions::new(key()))
        .encrypt("A=1\nB=2\n", None)
        .await
        .unwrap();

    let (_, engine) = setup(Fault::FailDecrypt, None);
    assert!(matches!(
        engine.decrypt(&sec).await,
        Err(Error::CryptoProvider(_))
    ));
}

#[tokio::test]
async fn test_timeout_aborts_the_call() {
    let provider = Arc::new(Faulty::new(
        MemoryProvider::new(),
        Fault::SlowEncrypt(Duration::from_millis(500)),
    ));
    let options = EngineOptions::new(key()).with_timeout(Duration::from_millis(20));
    let engine = SecretFileEngine::new(provider, options);

    assert!(matches!(
        engine.encrypt("A=1\n", None).await,
        Err(Error::Timeout(_))
    ));
}

#[tokio::test]
async fn test_output_does_not_depend_on_concurrency() {
    let provider = Arc::new(MemoryProvider::new());
    let serial =
        SecretFileEngine::new(provider.clone(), EngineOptions::new(key()).with_concurrency(1));
    let parallel =
        SecretFileEngine::new(provider.clone(), EngineOptions::new(key()).with_concurrency(16));

    let text: String = (0..40).map(|i| format!("KEY_{}=value-{}\n", i, i)).collect();
    let sec = parallel.encrypt(&text, None).await.unwrap();

    assert_eq!(serial.decrypt(&sec).await.unwrap(), text);
    assert_eq!(serial.encrypt(&text, Some(&sec)).await.unwrap(), sec);
}

#[tokio::test]
async fn test_duplicate_keys_are_kept() {
    let (_, engine) = setup(Fault::Healthy, None);

    let text = "A=first\nA=second\n";
    let sec = engine.encrypt(text, None).await.unwrap();
    assert_eq!(sec.lines().count(), 2);
    assert_eq!(engine.decrypt(&sec).await.unwrap(), text);
}

#[tokio::test]
async fn test_colon_entries_stay_entries_after_encryption() {
    let (_, engine) = setup(Fault::Healthy, None);

    let text = "HOST: example.com\nexport PORT:\t8080 # web\n";
    let sec = engine.encrypt(text, None).await.unwrap();

    let doc = Document::parse(&sec);
    assert_eq!(doc.keys(), vec!["HOST", "PORT"]);
    assert_eq!(doc.unrecognized().count(), 0);
    assert!(doc.get("PORT").unwrap().is_exported());
    assert!(envelope_of(&sec, "HOST").hash.matches(b"example.com"));
    assert!(sec.ends_with(" # web\n"));

    assert_eq!(engine.decrypt(&sec).await.unwrap(), text);
    assert_eq!(engine.encrypt(text, Some(&sec)).await.unwrap(), sec);
}

#[tokio::test]
async fn test_envelope_on_unrecognized_line_is_rejected() {
    let (_, engine) = setup(Fault::Healthy, None);

    let sec = engine
        .encrypt("# db\nHOST: example.com\n", None)
        .await
        .unwrap();
    let broken = sec.replace("HOST: ", "HOST:");
    assert_eq!(Document::parse(&broken).unrecognized().count(), 1);

    match engine.decrypt(&broken).await {
        Err(Error::EnvelopeDecode(message)) => assert!(message.contains("line 2")),
        other => panic!("expected envelope decode error, got {:?}", other),
    }
}

fn flaky_registry(provider: Arc<Faulty>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry
        .register(
            "flaky",
            Box::new(move |_| Ok(provider.clone() as Arc<dyn CryptoProvider>)),
        )
        .unwrap();
    registry
}

fn flaky_config(retry: Option<RetrySettings>) -> SecenvConfig {
    let mut config = SecenvConfig::new("flaky", serde_json::Value::Null, key());
    config.retry = retry;
    config
}

#[tokio::test]
async fn test_configured_retry_recovers_from_network_error() {
    let flaky = Arc::new(Faulty::new(MemoryProvider::new(), Fault::NetworkOnce));
    let config = flaky_config(Some(RetrySettings {
        max_retries: 2,
        initial_delay_ms: 1,
        max_delay_ms: 5,
    }));
    let provider = config.build_provider(&flaky_registry(flaky.clone())).unwrap();
    let engine = SecretFileEngine::new(provider, config.engine_options());

    let sec = engine.encrypt("A=1\n", None).await.unwrap();
    assert_eq!(flaky.encrypt_attempts(), 2);
    assert_eq!(flaky.inner.encrypt_calls(), 1);
    assert_eq!(engine.decrypt(&sec).await.unwrap(), "A=1\n");
}

#[tokio::test]
async fn test_network_error_is_fatal_without_retry() {
    let flaky = Arc::new(Faulty::new(MemoryProvider::new(), Fault::NetworkOnce));
    let config = flaky_config(None);
    let provider = config.build_provider(&flaky_registry(flaky.clone())).unwrap();
    let engine = SecretFileEngine::new(provider, config.engine_options());

    assert!(matches!(
        engine.encrypt("A=1\n", None).await,
        Err(Error::Network(_))
    ));
    assert_eq!(flaky.encrypt_attempts(), 1);
}
