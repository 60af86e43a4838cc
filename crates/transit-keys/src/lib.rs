//! Versioned key policies and envelope encryption.
//!
//! This crate manages named key *policies*, each holding an append-only list
//! of key versions, and performs authenticated encryption against them. It
//! supports per-context derived keys, convergent (deterministic) encryption,
//! key rotation and retirement, and KMS-style data key generation.
//!
//! # Modules
//!
//! - [`manager`]: [`PolicyManager`], the public entry point.
//! - [`policy`]: the policy record and its invariants.
//! - [`codec`]: storage serialization of policy records.
//! - [`derive`]: HKDF / SP 800-108 context key derivation.
//! - [`cipher`]: AES-256-GCM / ChaCha20-Poly1305 and version-tagged envelopes.
//! - [`lock`]: per-policy reader/writer locks with timeouts.
//! - [`cache`]: decoded-policy cache.
//! - [`datakey`]: data key sizes, modes and results.
//! - [`wire`]: request/response types for a transport layer.
//! - [`config`]: engine configuration.
//! - [`error`]: unified error type.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use transit_keys::{DataKeyMode, PolicyManager, TransitConfig};
//! use transit_store::MemoryStorage;
//!
//! # async fn example() -> transit_keys::Result<()> {
//! let manager = PolicyManager::new(Arc::new(MemoryStorage::new()), TransitConfig::default());
//!
//! // First encrypt creates the policy.
//! let envelope = manager.encrypt("orders", None, b"card ending 4242").await?;
//! manager.rotate("orders").await?;
//!
//! // Old ciphertexts still decrypt after rotation.
//! let plaintext = manager.decrypt("orders", None, &envelope).await?;
//! assert_eq!(plaintext, b"card ending 4242");
//!
//! // Envelope encryption: a local key plus its wrapped form.
//! let data_key = manager
//!     .generate_data_key("orders", None, 256, DataKeyMode::Plaintext)
//!     .await?;
//! assert!(data_key.plaintext().is_some());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cipher;
pub mod codec;
pub mod config;
pub mod datakey;
pub mod derive;
pub mod error;
pub mod lock;
pub mod manager;
pub mod policy;
pub mod wire;

pub use cipher::Envelope;
pub use config::TransitConfig;
pub use datakey::{DataKey, DataKeyBits, DataKeyMode};
pub use error::{Result, TransitError};
pub use lock::{LockManager, LockMode};
pub use manager::{ConfigUpdate, ExportedKeys, PolicyHandle, PolicyManager};
pub use policy::{KdfMode, KeyType, PolicyInfo, PolicyOptions};
