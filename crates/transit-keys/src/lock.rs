//! Per-policy reader/writer locks.
//!
//! Each policy name maps to its own `tokio::sync::RwLock`, so operations on
//! different names never contend. The registry is a [`DashMap`]; its shard
//! lock is only held while an entry is looked up or inserted, never while a
//! caller waits for the policy lock itself.
//!
//! Discipline:
//!
//! - any number of [`LockMode::Shared`] holders may coexist;
//! - a [`LockMode::Exclusive`] request waits for current holders to leave
//!   and, while queued, blocks new requests (tokio's lock is fair);
//! - there is no in-place upgrade. A shared holder that needs to mutate must
//!   drop its guard and acquire exclusive access afresh;
//! - every acquisition is bounded by a timeout and yields
//!   [`TransitError::Busy`] on expiry.
//!
//! Guards release on drop, so a failure inside a held lock always releases
//! it on the way out.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::error::{Result, TransitError};

/// Requested access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Proof of access to one policy name. Dropping it releases the lock.
#[derive(Debug)]
pub enum LockGuard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

impl LockGuard {
    pub fn mode(&self) -> LockMode {
        match self {
            Self::Shared(_) => LockMode::Shared,
            Self::Exclusive(_) => LockMode::Exclusive,
        }
    }
}

/// Registry of per-name reader/writer locks.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl LockManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, name: &str) -> Arc<RwLock<()>> {
        if let Some(lock) = self.locks.get(name) {
            return Arc::clone(lock.value());
        }
        Arc::clone(self.locks.entry(name.to_string()).or_default().value())
    }

    /// Acquire `name` in `mode`, waiting at most `timeout`.
    ///
    /// A zero timeout still succeeds when the lock is immediately available.
    ///
    /// # Errors
    ///
    /// Returns [`TransitError::Busy`] if the lock is not granted in time.
    pub async fn acquire(&self, name: &str, mode: LockMode, timeout: Duration) -> Result<LockGuard> {
        let lock = self.entry(name);
        let granted = match mode {
            LockMode::Shared => tokio::time::timeout(timeout, lock.read_owned())
                .await
                .map(LockGuard::Shared),
            LockMode::Exclusive => tokio::time::timeout(timeout, lock.write_owned())
                .await
                .map(LockGuard::Exclusive),
        };

        match granted {
            Ok(guard) => {
                tracing::trace!(name, ?mode, "policy lock acquired");
                Ok(guard)
            }
            Err(_) => {
                tracing::debug!(name, ?mode, timeout_ms = timeout.as_millis() as u64, "policy lock timed out");
                // The abandoned waiter held a reference; the entry may now be unused.
                self.prune(name);
                Err(TransitError::Busy {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Whether nobody holds or awaits the lock for `name`.
    pub fn is_idle(&self, name: &str) -> bool {
        match self.locks.get(name) {
            Some(lock) => lock.value().try_write().is_ok(),
            None => true,
        }
    }

    /// Drop the registry entry for `name` if no guard or waiter references it.
    ///
    /// The check and removal happen under the shard lock, and new references
    /// are only handed out under that same lock, so a removed entry can never
    /// be in use.
    pub fn prune(&self, name: &str) -> bool {
        self.locks
            .remove_if(name, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    /// Number of names with a registered lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
