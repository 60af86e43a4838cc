//! Integration tests for the transit-keys crate.
//!
//! These exercise the policy manager end to end: creation, encryption across
//! rotations, retirement, data keys, concurrency and tamper resistance.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use transit_keys::wire::{self, DataKeyRequest, DecryptRequest, EncryptRequest};
use transit_keys::{
    DataKeyMode, Envelope, KdfMode, KeyType, LockMode, PolicyManager, PolicyOptions,
    TransitConfig, TransitError,
};
use transit_store::{MemoryStorage, SqliteStorage, Storage, StoreError, StoreResult};

fn manager() -> PolicyManager {
    PolicyManager::new(Arc::new(MemoryStorage::new()), TransitConfig::default())
}

fn derived_options(convergent: bool) -> PolicyOptions {
    PolicyOptions {
        derived: true,
        convergent_encryption: convergent,
        ..PolicyOptions::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Round trips
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn encrypt_decrypt_roundtrip() {
    let manager = manager();
    for message in [&b""[..], b"a", b"hello transit", &[0xAB; 4096][..]] {
        let envelope = manager.encrypt("orders", None, message).await.unwrap();
        assert_eq!(manager.decrypt("orders", None, &envelope).await.unwrap(), message);
    }
}

#[tokio::test]
async fn names_are_case_insensitive() {
    let manager = manager();
    let envelope = manager.encrypt("Orders", None, b"x").await.unwrap();
    assert_eq!(manager.decrypt("ORDERS", None, &envelope).await.unwrap(), b"x");
    assert_eq!(manager.list().await.unwrap(), vec!["orders".to_string()]);
}

#[tokio::test]
async fn chacha_policy_roundtrip() {
    let manager = manager();
    let options = PolicyOptions {
        key_type: KeyType::ChaCha20Poly1305,
        ..PolicyOptions::default()
    };
    manager.create("chacha", &options).await.unwrap();
    let envelope = manager.encrypt("chacha", None, b"poly").await.unwrap();
    assert_eq!(manager.decrypt("chacha", None, &envelope).await.unwrap(), b"poly");
}

#[tokio::test]
async fn derived_policy_needs_context() {
    let manager = manager();
    manager.create("tenants", &derived_options(false)).await.unwrap();

    let err = manager.encrypt("tenants", None, b"x").await.unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));
    let err = manager.encrypt("tenants", Some(b""), b"x").await.unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));

    let envelope = manager.encrypt("tenants", Some(b"t1"), b"x").await.unwrap();
    assert_eq!(
        manager.decrypt("tenants", Some(b"t1"), &envelope).await.unwrap(),
        b"x"
    );
    let err = manager
        .decrypt("tenants", Some(b"t2"), &envelope)
        .await
        .unwrap_err();
    assert!(matches!(err, TransitError::Crypto(_)));
}

#[tokio::test]
async fn context_for_plain_policy_is_rejected() {
    let manager = manager();
    manager.create("plain", &PolicyOptions::default()).await.unwrap();
    let err = manager.encrypt("plain", Some(b"ctx"), b"x").await.unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));
}

#[tokio::test]
async fn counter_mode_kdf_roundtrip() {
    let manager = manager();
    let options = PolicyOptions {
        kdf: KdfMode::HmacSha256Counter,
        ..derived_options(false)
    };
    manager.create("legacy", &options).await.unwrap();
    let envelope = manager.encrypt("legacy", Some(b"ctx"), b"x").await.unwrap();
    assert_eq!(manager.decrypt("legacy", Some(b"ctx"), &envelope).await.unwrap(), b"x");
}

// ═══════════════════════════════════════════════════════════════════════
//  Convergent encryption
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn convergent_determinism_and_context_separation() {
    let manager = manager();
    manager.create("dedupe", &derived_options(true)).await.unwrap();

    let a1 = manager.encrypt("dedupe", Some(b"ctx1"), b"same").await.unwrap();
    let a2 = manager.encrypt("dedupe", Some(b"ctx1"), b"same").await.unwrap();
    let b = manager.encrypt("dedupe", Some(b"ctx2"), b"same").await.unwrap();

    assert_eq!(a1.to_string(), a2.to_string());
    assert_ne!(a1, b);
    assert_eq!(manager.decrypt("dedupe", Some(b"ctx2"), &b).await.unwrap(), b"same");
}

#[tokio::test]
async fn non_convergent_encryption_is_randomized() {
    let manager = manager();
    let a = manager.encrypt("random", None, b"same").await.unwrap();
    let b = manager.encrypt("random", None, b"same").await.unwrap();
    assert_ne!(a, b);
}

// ═══════════════════════════════════════════════════════════════════════
//  Rotation and retirement
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn rotation_monotonicity() {
    let manager = manager();
    let mut envelopes = vec![manager.encrypt("rot", None, b"v1").await.unwrap()];

    for k in 1..=4u32 {
        assert_eq!(manager.rotate("rot").await.unwrap(), k + 1);
        let message = format!("v{}", k + 1);
        envelopes.push(manager.encrypt("rot", None, message.as_bytes()).await.unwrap());
    }

    let info = manager.read("rot").await.unwrap();
    assert_eq!(info.latest_version, 5);
    assert_eq!(info.versions.len(), 5);

    for (index, envelope) in envelopes.iter().enumerate() {
        assert_eq!(envelope.version as usize, index + 1);
        let expected = format!("v{}", index + 1);
        assert_eq!(
            manager.decrypt("rot", None, envelope).await.unwrap(),
            expected.as_bytes()
        );
    }
}

#[tokio::test]
async fn rejected_first_encrypt_creates_nothing() {
    let manager = manager();

    let err = manager
        .encrypt_with_version("fresh", None, b"x", Some(5))
        .await
        .unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));

    let err = manager.encrypt("blank", Some(b""), b"x").await.unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));

    assert!(manager.list().await.unwrap().is_empty());
    assert!(manager.locks().is_empty());

    let envelope = manager
        .encrypt_with_version("fresh", None, b"x", Some(1))
        .await
        .unwrap();
    assert_eq!(envelope.version, 1);
    assert_eq!(manager.list().await.unwrap(), vec!["fresh"]);
}

#[tokio::test]
async fn derived_defaults_without_context_create_nothing() {
    let config = TransitConfig {
        defaults: PolicyOptions {
            derived: true,
            ..PolicyOptions::default()
        },
        ..TransitConfig::default()
    };
    let manager = PolicyManager::new(Arc::new(MemoryStorage::new()), config);

    let err = manager.encrypt("tenant", None, b"x").await.unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));
    assert!(manager.list().await.unwrap().is_empty());

    manager.encrypt("tenant", Some(b"acme"), b"x").await.unwrap();
    assert_eq!(manager.list().await.unwrap(), vec!["tenant"]);
}

#[tokio::test]
async fn missing_policies_leave_no_lock_entries() {
    let manager = manager();
    let envelope = manager.encrypt("real", None, b"x").await.unwrap();
    let baseline = manager.locks().len();

    for i in 0..100 {
        let name = format!("missing-{i}");
        let results = [
            manager.decrypt(&name, None, &envelope).await.err(),
            manager.read(&name).await.err(),
            manager.rotate(&name).await.err(),
            manager.delete(&name).await.err(),
            manager
                .generate_data_key(&name, None, 256, DataKeyMode::Wrapped)
                .await
                .err(),
        ];
        for err in results {
            assert!(matches!(err, Some(TransitError::NotFound { .. })));
        }
    }

    assert_eq!(manager.locks().len(), baseline);
}

#[tokio::test]
async fn rotate_requires_existing_policy() {
    let err = manager().rotate("missing").await.unwrap_err();
    assert!(matches!(err, TransitError::NotFound { .. }));
}

#[tokio::test]
async fn retirement_enforcement() {
    let manager = manager();
    let old = manager.encrypt("ret", None, b"old").await.unwrap();
    manager.rotate("ret").await.unwrap();
    let new = manager.encrypt("ret", None, b"new").await.unwrap();

    let info = manager.retire("ret", Some(2), Some(2)).await.unwrap();
    assert_eq!(info.min_decryption_version, 2);

    let err = manager.decrypt("ret", None, &old).await.unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));
    assert_eq!(manager.decrypt("ret", None, &new).await.unwrap(), b"new");

    // Bounds never move backwards.
    let err = manager.retire("ret", Some(1), None).await.unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));
}

#[tokio::test]
async fn pinned_encryption_version() {
    let manager = manager();
    manager.create("pin", &PolicyOptions::default()).await.unwrap();
    manager.rotate("pin").await.unwrap();
    manager.rotate("pin").await.unwrap();
    manager.retire("pin", None, Some(2)).await.unwrap();

    let envelope = manager
        .encrypt_with_version("pin", None, b"x", Some(2))
        .await
        .unwrap();
    assert_eq!(envelope.version, 2);

    let err = manager
        .encrypt_with_version("pin", None, b"x", Some(1))
        .await
        .unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));
}

#[tokio::test]
async fn rewrap_moves_ciphertext_to_latest_version() {
    let manager = manager();
    let old = manager.encrypt("wrap", None, b"payload").await.unwrap();
    manager.rotate("wrap").await.unwrap();
    manager.rotate("wrap").await.unwrap();

    let rewrapped = manager.rewrap("wrap", None, &old).await.unwrap();
    assert_eq!(rewrapped.version, 3);

    manager.retire("wrap", Some(3), Some(3)).await.unwrap();
    assert_eq!(manager.decrypt("wrap", None, &rewrapped).await.unwrap(), b"payload");
}

#[tokio::test]
async fn version_beyond_latest_is_invalid() {
    let manager = manager();
    let mut envelope = manager.encrypt("future", None, b"x").await.unwrap();
    envelope.version = 9;
    let err = manager.decrypt("future", None, &envelope).await.unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));
}

// ═══════════════════════════════════════════════════════════════════════
//  Data keys
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn data_key_sizes() {
    let manager = manager();
    manager.create("dk", &PolicyOptions::default()).await.unwrap();

    for (bits, len) in [(128, 16), (256, 32), (512, 64)] {
        let key = manager
            .generate_data_key("dk", None, bits, DataKeyMode::Plaintext)
            .await
            .unwrap();
        let raw = STANDARD.decode(key.plaintext().unwrap()).unwrap();
        assert_eq!(raw.len(), len);

        // The wrapped form decrypts to the same base64 text.
        let envelope: Envelope = key.ciphertext.parse().unwrap();
        let unwrapped = manager.decrypt("dk", None, &envelope).await.unwrap();
        assert_eq!(unwrapped, key.plaintext().unwrap().as_bytes());
    }
}

#[tokio::test]
async fn data_key_wrapped_mode_has_no_plaintext() {
    let manager = manager();
    manager.create("dk", &PolicyOptions::default()).await.unwrap();

    let resp = wire::handle_datakey(
        &manager,
        &DataKeyRequest {
            name: "dk".into(),
            mode: "wrapped".into(),
            context: None,
            bits: None,
        },
    )
    .await
    .unwrap();

    let json = serde_json::to_value(&resp).unwrap();
    assert!(json.get("plaintext").is_none());
    assert!(json["ciphertext"].as_str().unwrap().starts_with("transit:v1:"));
}

#[tokio::test]
async fn data_key_bad_bits_is_invalid() {
    let manager = manager();
    // Checked before the policy lookup, so a missing policy still reports the size.
    let err = manager
        .generate_data_key("absent", None, 200, DataKeyMode::Plaintext)
        .await
        .unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));
    assert!(manager.list().await.unwrap().is_empty());

    manager.create("dk", &PolicyOptions::default()).await.unwrap();
    let err = manager
        .generate_data_key("dk", None, 200, DataKeyMode::Plaintext)
        .await
        .unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));
}

#[tokio::test]
async fn data_key_never_creates_policy() {
    let manager = manager();
    let err = manager
        .generate_data_key("absent", None, 256, DataKeyMode::Wrapped)
        .await
        .unwrap_err();
    assert!(matches!(err, TransitError::NotFound { .. }));
    assert!(manager.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn data_key_with_derived_context() {
    let manager = manager();
    manager.create("dk", &derived_options(false)).await.unwrap();

    let resp = wire::handle_datakey(
        &manager,
        &DataKeyRequest {
            name: "dk".into(),
            mode: "plaintext".into(),
            context: Some(STANDARD.encode("tenant")),
            bits: Some(128),
        },
    )
    .await
    .unwrap();
    assert_eq!(STANDARD.decode(resp.plaintext.unwrap()).unwrap().len(), 16);

    let err = manager
        .generate_data_key("dk", None, 256, DataKeyMode::Wrapped)
        .await
        .unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));
}

#[tokio::test]
async fn data_key_invalid_mode() {
    let manager = manager();
    manager.create("dk", &PolicyOptions::default()).await.unwrap();
    let err = wire::handle_datakey(
        &manager,
        &DataKeyRequest {
            name: "dk".into(),
            mode: "both".into(),
            context: None,
            bits: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));
}

// ═══════════════════════════════════════════════════════════════════════
//  Tamper resistance
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn flipped_bits_yield_crypto_error() {
    let manager = manager();
    let envelope = manager.encrypt("tamper", None, b"integrity").await.unwrap();

    for byte in 0..envelope.ciphertext.len() {
        for bit in 0..8 {
            let mut tampered = envelope.clone();
            tampered.ciphertext[byte] ^= 1 << bit;
            let err = manager.decrypt("tamper", None, &tampered).await.unwrap_err();
            assert!(matches!(err, TransitError::Crypto(_)), "byte {byte} bit {bit}");
        }
    }
}

#[tokio::test]
async fn relabelled_version_yields_crypto_error() {
    let manager = manager();
    let mut envelope = manager.encrypt("tamper", None, b"integrity").await.unwrap();
    manager.rotate("tamper").await.unwrap();
    envelope.version = 2;
    let err = manager.decrypt("tamper", None, &envelope).await.unwrap_err();
    assert!(matches!(err, TransitError::Crypto(_)));
}

#[tokio::test]
async fn mangled_envelope_text_never_decrypts() {
    let manager = manager();
    let text = manager.encrypt("tamper", None, b"integrity").await.unwrap().to_string();
    let header_len = "transit:v1:".len();
    assert!(text.starts_with("transit:v1:"));

    for index in 0..text.len() {
        let mut bytes = text.clone().into_bytes();
        bytes[index] ^= 0x01;
        let Ok(mangled) = String::from_utf8(bytes) else {
            continue;
        };
        let result = wire::handle_decrypt(
            &manager,
            &DecryptRequest {
                name: "tamper".into(),
                ciphertext: mangled.clone(),
                context: None,
            },
        )
        .await;
        let err = result.err().unwrap_or_else(|| panic!("index {index} decrypted"));

        // Header damage or broken base64 is a malformed envelope; anything
        // that still parses must fail authentication.
        if index < header_len || mangled.parse::<Envelope>().is_err() {
            assert!(matches!(err, TransitError::InvalidArgument(_)), "index {index}: {err:?}");
        } else {
            assert!(matches!(err, TransitError::Crypto(_)), "index {index}: {err:?}");
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Concurrency
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_encrypts_on_one_policy() {
    let manager = Arc::new(manager());

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..32 {
        let manager = Arc::clone(&manager);
        tasks.spawn(async move {
            let message = format!("message {i}");
            let envelope = manager.encrypt("shared", None, message.as_bytes()).await?;
            let plaintext = manager.decrypt("shared", None, &envelope).await?;
            assert_eq!(plaintext, message.as_bytes());
            Ok::<_, TransitError>(())
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    let info = manager.read("shared").await.unwrap();
    assert_eq!(info.latest_version, 1);
    assert_eq!(manager.list().await.unwrap(), vec!["shared".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rotation_racing_encrypts_never_tears() {
    let manager = Arc::new(manager());
    manager.create("race", &PolicyOptions::default()).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..24 {
        let manager = Arc::clone(&manager);
        tasks.spawn(async move {
            if i % 8 == 0 {
                manager.rotate("race").await?;
                return Ok(None);
            }
            let envelope = manager.encrypt("race", None, b"racing").await?;
            Ok::<_, TransitError>(Some(envelope))
        });
    }

    let mut envelopes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Some(envelope) = joined.unwrap().unwrap() {
            envelopes.push(envelope);
        }
    }

    let info = manager.read("race").await.unwrap();
    assert_eq!(info.latest_version, 4);
    assert_eq!(info.versions.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);

    for envelope in &envelopes {
        assert!((1..=4).contains(&envelope.version));
        assert_eq!(manager.decrypt("race", None, envelope).await.unwrap(), b"racing");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_creates_once() {
    let storage = Arc::new(MemoryStorage::new());
    let manager = Arc::new(PolicyManager::new(storage.clone(), TransitConfig::default()));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let manager = Arc::clone(&manager);
        tasks.spawn(async move { manager.encrypt("fresh", None, b"x").await });
    }
    let mut envelopes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        envelopes.push(joined.unwrap().unwrap());
    }

    // Every caller used the same version-1 key.
    for envelope in &envelopes {
        assert_eq!(manager.decrypt("fresh", None, envelope).await.unwrap(), b"x");
    }
    assert_eq!(storage.len().await, 1);
}

#[tokio::test]
async fn busy_when_exclusive_holder_lingers() {
    let config = TransitConfig {
        lock_timeout_ms: 25,
        ..TransitConfig::default()
    };
    let manager = PolicyManager::new(Arc::new(MemoryStorage::new()), config);
    manager.create("held", &PolicyOptions::default()).await.unwrap();

    let handle = manager.get("held", LockMode::Exclusive).await.unwrap();
    let err = manager.encrypt("held", None, b"x").await.unwrap_err();
    assert!(matches!(err, TransitError::Busy { .. }));

    // Other names are unaffected.
    assert!(manager.encrypt("other", None, b"x").await.is_ok());
    drop(handle);
    assert!(manager.encrypt("held", None, b"x").await.is_ok());
}

// ═══════════════════════════════════════════════════════════════════════
//  Persistence
// ═══════════════════════════════════════════════════════════════════════

/// Storage wrapper whose writes can be switched off.
struct FlakyStorage {
    inner: MemoryStorage,
    fail_puts: AtomicBool,
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::TaskJoin("injected write failure".into()));
        }
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.inner.list(prefix).await
    }
}

#[tokio::test]
async fn failed_write_leaves_policy_unchanged() {
    let storage = Arc::new(FlakyStorage {
        inner: MemoryStorage::new(),
        fail_puts: AtomicBool::new(false),
    });
    let manager = PolicyManager::new(storage.clone(), TransitConfig::default());
    manager.create("flaky", &PolicyOptions::default()).await.unwrap();

    storage.fail_puts.store(true, Ordering::SeqCst);
    let err = manager.rotate("flaky").await.unwrap_err();
    assert!(matches!(err, TransitError::Internal(_)));
    assert_eq!(manager.read("flaky").await.unwrap().latest_version, 1);

    storage.fail_puts.store(false, Ordering::SeqCst);
    assert_eq!(manager.rotate("flaky").await.unwrap(), 2);
}

#[tokio::test]
async fn corrupted_record_is_internal_error() {
    let storage = Arc::new(MemoryStorage::new());
    storage.put("policy/broken", b"{not json").await.unwrap();
    let manager = PolicyManager::new(storage, TransitConfig::default());

    let err = manager.read("broken").await.unwrap_err();
    assert!(matches!(err, TransitError::Internal(_)));
}

#[tokio::test]
async fn policies_survive_manager_restart_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("transit.db");

    let envelope = {
        let storage = Arc::new(SqliteStorage::open(path.clone()).await.unwrap());
        let manager = PolicyManager::new(storage, TransitConfig::default());
        let envelope = manager.encrypt("durable", None, b"persisted").await.unwrap();
        manager.rotate("durable").await.unwrap();
        envelope
    };

    let storage = Arc::new(SqliteStorage::open(path).await.unwrap());
    let manager = PolicyManager::new(storage, TransitConfig::default());
    assert_eq!(manager.read("durable").await.unwrap().latest_version, 2);
    assert_eq!(
        manager.decrypt("durable", None, &envelope).await.unwrap(),
        b"persisted"
    );
}

#[tokio::test]
async fn cache_is_used_for_shared_reads() {
    let manager = manager();
    manager.encrypt("cached", None, b"x").await.unwrap();
    let before = manager.cache().stats().hits();
    manager.encrypt("cached", None, b"y").await.unwrap();
    assert!(manager.cache().stats().hits() > before);
}

// ═══════════════════════════════════════════════════════════════════════
//  Administration
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn delete_requires_flag() {
    let manager = manager();
    manager.create("keep", &PolicyOptions::default()).await.unwrap();
    let err = manager.delete("keep").await.unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));
    assert!(manager.read("keep").await.is_ok());

    manager
        .update_config(
            "keep",
            transit_keys::ConfigUpdate {
                deletion_allowed: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    manager.delete("keep").await.unwrap();
    let err = manager.read("keep").await.unwrap_err();
    assert!(matches!(err, TransitError::NotFound { .. }));
}

#[tokio::test]
async fn export_requires_exportable() {
    let manager = manager();
    manager.create("sealed", &PolicyOptions::default()).await.unwrap();
    let err = manager.export_key("sealed", None).await.unwrap_err();
    assert!(matches!(err, TransitError::InvalidArgument(_)));

    let options = PolicyOptions {
        exportable: true,
        ..PolicyOptions::default()
    };
    manager.create("open", &options).await.unwrap();
    manager.rotate("open").await.unwrap();
    let exported = manager.export_key("open", None).await.unwrap();
    assert_eq!(exported.keys.len(), 2);
    assert_eq!(STANDARD.decode(&exported.keys[&2]).unwrap().len(), 32);
}

#[tokio::test]
async fn create_is_idempotent() {
    let manager = manager();
    let first = manager.create("same", &PolicyOptions::default()).await.unwrap();
    let second = manager.create("same", &derived_options(false)).await.unwrap();
    assert_eq!(first, second);
    assert!(!second.derived);
}

#[tokio::test]
async fn wire_encrypt_decrypt_roundtrip() {
    let manager = manager();
    let encrypted = wire::handle_encrypt(
        &manager,
        &EncryptRequest {
            name: "wire".into(),
            plaintext: STANDARD.encode("over the wire"),
            context: None,
            key_version: None,
        },
    )
    .await
    .unwrap();

    let decrypted = wire::handle_decrypt(
        &manager,
        &DecryptRequest {
            name: "wire".into(),
            ciphertext: encrypted.ciphertext,
            context: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(STANDARD.decode(decrypted.plaintext).unwrap(), b"over the wire");
}

#[tokio::test]
async fn lock_is_released_after_timeout_race() {
    let config = TransitConfig {
        lock_timeout_ms: 10,
        ..TransitConfig::default()
    };
    let manager = PolicyManager::new(Arc::new(MemoryStorage::new()), config);
    manager.create("k", &PolicyOptions::default()).await.unwrap();

    let handle = manager.get("k", LockMode::Shared).await.unwrap();
    assert!(manager.rotate("k").await.is_err());
    drop(handle);

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(manager.locks().is_idle("k"));
}
