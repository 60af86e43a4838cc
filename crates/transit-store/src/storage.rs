//! The key-value contract every backend implements.
//!
//! The transit engine treats persistence as an opaque byte store. Backends
//! must make each single-key operation atomic and must give read-after-write
//! consistency: a `get` issued after a successful `put` on the same key
//! observes the written bytes.

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};

/// Opaque key-value storage used to persist policy records.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Returns `true` if a value was present.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// List every key starting with `prefix`, in ascending order.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Reject keys no backend should accept.
pub(crate) fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
