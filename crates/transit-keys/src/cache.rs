//! In-memory policy cache using [`moka`].
//!
//! Holds decoded policies as `Arc<Policy>` snapshots so shared-lock
//! operations skip storage and decoding. The cache is only written while the
//! caller holds the policy's lock, and mutations always re-read storage
//! before changing anything, so a stale entry can never cause a lost update.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::future::Cache;
use tracing::debug;

use crate::policy::Policy;

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking cache effectiveness.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hits={} misses={}", self.hits(), self.misses())
    }
}

// ── policy cache ─────────────────────────────────────────────────────

/// Bounded cache of decoded policies keyed by normalized name.
///
/// A capacity of zero disables caching entirely; every lookup misses.
#[derive(Clone)]
pub struct PolicyCache {
    inner: Option<Cache<String, Arc<Policy>>>,
    stats: Arc<CacheStats>,
}

impl PolicyCache {
    pub fn new(max_capacity: u64) -> Self {
        let inner = (max_capacity > 0).then(|| Cache::builder().max_capacity(max_capacity).build());
        Self {
            inner,
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Policy>> {
        let found = match &self.inner {
            Some(cache) => cache.get(name).await,
            None => None,
        };
        match found {
            Some(policy) => {
                self.stats.record_hit();
                debug!(name, "policy cache hit");
                Some(policy)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    pub async fn insert(&self, policy: Arc<Policy>) {
        if let Some(cache) = &self.inner {
            cache.insert(policy.name().to_string(), policy).await;
        }
    }

    pub async fn invalidate(&self, name: &str) {
        if let Some(cache) = &self.inner {
            cache.invalidate(name).await;
            debug!(name, "policy cache invalidate");
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
