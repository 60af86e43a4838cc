//! The policy manager: public entry point of the transit engine.
//!
//! [`PolicyManager`] owns every policy record. It resolves names through the
//! [`LockManager`], loads records from the [`PolicyCache`] or storage, runs
//! the cipher and deriver against an immutable snapshot, and persists
//! mutations through the codec.
//!
//! # Lock modes per operation
//!
//! | operation                                          | lock      | creates? |
//! |----------------------------------------------------|-----------|----------|
//! | `encrypt`, `encrypt_with_version`                  | shared    | if `auto_create` |
//! | `decrypt`, `rewrap`, `generate_data_key`, `read`, `export_key` | shared | no |
//! | `create`, `rotate`, `retire`, `update_config`, `delete` | exclusive | `create` only |
//!
//! Auto-creation never upgrades a shared lock in place: the caller releases
//! shared access, acquires exclusive access, re-checks storage, creates and
//! persists, then releases and re-acquires shared access.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, info, warn};
use transit_store::Storage;
use zeroize::Zeroizing;

use crate::cache::PolicyCache;
use crate::cipher::{self, Envelope};
use crate::codec;
use crate::config::TransitConfig;
use crate::datakey::{DataKey, DataKeyBits, DataKeyMode};
use crate::error::{Result, TransitError};
use crate::lock::{LockGuard, LockManager, LockMode};
use crate::policy::{KeyType, Policy, PolicyInfo, PolicyOptions, normalize_name};

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A policy snapshot plus the lock that keeps it current.
///
/// While the handle lives, no other caller can mutate the policy (shared
/// mode) or access it at all (exclusive mode). Dropping the handle releases
/// the lock.
#[derive(Debug)]
pub struct PolicyHandle {
    policy: Arc<Policy>,
    guard: LockGuard,
}

impl PolicyHandle {
    pub fn mode(&self) -> LockMode {
        self.guard.mode()
    }
}

impl Deref for PolicyHandle {
    type Target = Policy;

    fn deref(&self) -> &Policy {
        &self.policy
    }
}

/// Flag changes accepted by [`PolicyManager::update_config`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub deletion_allowed: Option<bool>,
    /// Can only be switched on.
    pub exportable: Option<bool>,
}

/// Raw key material released by [`PolicyManager::export_key`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ExportedKeys {
    pub name: String,
    pub key_type: KeyType,
    /// Base64 key bytes keyed by version.
    pub keys: BTreeMap<u32, String>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Orchestrates locking, caching, persistence and cryptography for named
/// key policies.
pub struct PolicyManager {
    storage: Arc<dyn Storage>,
    locks: LockManager,
    cache: PolicyCache,
    config: TransitConfig,
}

impl PolicyManager {
    pub fn new(storage: Arc<dyn Storage>, config: TransitConfig) -> Self {
        info!(
            lock_timeout_ms = config.lock_timeout_ms,
            auto_create = config.auto_create,
            cache_capacity = config.cache_capacity,
            "policy manager ready"
        );
        Self {
            storage,
            locks: LockManager::new(),
            cache: PolicyCache::new(config.cache_capacity),
            config,
        }
    }

    pub fn config(&self) -> &TransitConfig {
        &self.config
    }

    pub fn cache(&self) -> &PolicyCache {
        &self.cache
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    // -- Loading and persistence ---------------------------------------------

    async fn acquire(&self, name: &str, mode: LockMode) -> Result<LockGuard> {
        self.locks
            .acquire(name, mode, self.config.lock_timeout())
            .await
    }

    /// Read and decode the persisted record, bypassing the cache.
    async fn load_fresh(&self, name: &str) -> Result<Option<Policy>> {
        match self.storage.get(&codec::storage_key(name)).await? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load a snapshot for a caller holding `mode` on `name`.
    ///
    /// Shared holders may use the cache; exclusive holders always re-read
    /// storage so they mutate the source of truth.
    async fn load(&self, name: &str, mode: LockMode) -> Result<Option<Arc<Policy>>> {
        if mode == LockMode::Shared {
            if let Some(policy) = self.cache.get(name).await {
                return Ok(Some(policy));
            }
        }
        match self.load_fresh(name).await? {
            Some(policy) => {
                let policy = Arc::new(policy);
                self.cache.insert(Arc::clone(&policy)).await;
                Ok(Some(policy))
            }
            None => {
                self.cache.invalidate(name).await;
                Ok(None)
            }
        }
    }

    /// Persist the full record in one `put`. The cache only learns about the
    /// new state once the write succeeded.
    async fn persist(&self, policy: Policy) -> Result<Arc<Policy>> {
        let bytes = codec::encode(&policy)?;
        if let Err(err) = self
            .storage
            .put(&codec::storage_key(policy.name()), &bytes)
            .await
        {
            warn!(name = policy.name(), %err, "failed to persist policy");
            self.cache.invalidate(policy.name()).await;
            return Err(err.into());
        }
        let policy = Arc::new(policy);
        self.cache.insert(Arc::clone(&policy)).await;
        Ok(policy)
    }

    /// Release `guard` and drop the lock entry of a name that has no record,
    /// so unknown names never accumulate in the registry.
    fn release_unused(&self, name: &str, guard: LockGuard) {
        drop(guard);
        self.locks.prune(name);
    }

    fn not_found(&self, name: String, guard: LockGuard) -> TransitError {
        self.release_unused(&name, guard);
        TransitError::NotFound { name }
    }

    /// Run `f` against a fresh copy of the record under exclusive access and
    /// persist the result. On any error nothing is written.
    async fn mutate<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Policy) -> Result<T>,
    ) -> Result<(Arc<Policy>, T)> {
        let name = normalize_name(name)?;
        let guard = self.acquire(&name, LockMode::Exclusive).await?;
        let Some(mut policy) = self.load_fresh(&name).await? else {
            return Err(self.not_found(name, guard));
        };
        let out = f(&mut policy)?;
        let policy = self.persist(policy).await?;
        Ok((policy, out))
    }

    // -- Handles -----------------------------------------------------------------

    /// Resolve an existing policy and hold it in `mode`.
    ///
    /// # Errors
    ///
    /// [`TransitError::NotFound`] if no such policy exists,
    /// [`TransitError::Busy`] if the lock is not granted in time.
    pub async fn get(&self, name: &str, mode: LockMode) -> Result<PolicyHandle> {
        let name = normalize_name(name)?;
        let guard = self.acquire(&name, mode).await?;
        match self.load(&name, mode).await? {
            Some(policy) => Ok(PolicyHandle { policy, guard }),
            None => Err(self.not_found(name, guard)),
        }
    }

    /// Resolve `name`, creating it with `options` if it does not exist, and
    /// hold it in `mode`.
    pub async fn get_or_create(
        &self,
        name: &str,
        options: &PolicyOptions,
        mode: LockMode,
    ) -> Result<PolicyHandle> {
        self.get_or_create_with(name, options, mode, |_| Ok(()))
            .await
    }

    /// [`PolicyManager::get_or_create`], with `admit` run against a policy
    /// about to be created. If it fails, nothing is persisted.
    async fn get_or_create_with(
        &self,
        name: &str,
        options: &PolicyOptions,
        mode: LockMode,
        admit: impl FnOnce(&Policy) -> Result<()>,
    ) -> Result<PolicyHandle> {
        let name = normalize_name(name)?;
        options.validate()?;

        // Phase 1: the common case, the policy already exists.
        let guard = self.acquire(&name, mode).await?;
        if let Some(policy) = self.load(&name, mode).await? {
            return Ok(PolicyHandle { policy, guard });
        }
        drop(guard);

        // Phase 2: exclusive access, re-check, create.
        let guard = self.acquire(&name, LockMode::Exclusive).await?;
        let policy = match self.load(&name, LockMode::Exclusive).await? {
            Some(existing) => existing,
            None => {
                let candidate = Policy::new(&name, options).and_then(|policy| {
                    admit(&policy)?;
                    Ok(policy)
                });
                let persisted = match candidate {
                    Ok(policy) => self.persist(policy).await,
                    Err(err) => Err(err),
                };
                let created = match persisted {
                    Ok(created) => created,
                    Err(err) => {
                        self.release_unused(&name, guard);
                        return Err(err);
                    }
                };
                info!(
                    name = %name,
                    key_type = %created.key_type(),
                    derived = created.derived(),
                    convergent = created.convergent_encryption(),
                    "created policy"
                );
                created
            }
        };
        if mode == LockMode::Exclusive {
            return Ok(PolicyHandle { policy, guard });
        }
        drop(guard);

        // Phase 3: back to shared access. The record may have been deleted
        // in the gap.
        let guard = self.acquire(&name, LockMode::Shared).await?;
        match self.load(&name, LockMode::Shared).await? {
            Some(policy) => Ok(PolicyHandle { policy, guard }),
            None => Err(self.not_found(name, guard)),
        }
    }

    // -- Core operations ---------------------------------------------------------

    /// Explicitly create a policy. Idempotent: an existing policy is returned
    /// unchanged, whatever `options` say.
    pub async fn create(&self, name: &str, options: &PolicyOptions) -> Result<PolicyInfo> {
        let handle = self.get_or_create(name, options, LockMode::Exclusive).await?;
        Ok(handle.info())
    }

    /// Encrypt `plaintext` under the latest version of `name`.
    ///
    /// When `auto_create` is enabled a missing policy is created from the
    /// configured defaults; a supplied context marks it as derived.
    pub async fn encrypt(
        &self,
        name: &str,
        context: Option<&[u8]>,
        plaintext: &[u8],
    ) -> Result<Envelope> {
        self.encrypt_with_version(name, context, plaintext, None)
            .await
    }

    /// Encrypt, optionally pinning a key version no lower than
    /// `min_encryption_version`.
    pub async fn encrypt_with_version(
        &self,
        name: &str,
        context: Option<&[u8]>,
        plaintext: &[u8],
        version: Option<u32>,
    ) -> Result<Envelope> {
        let handle = if self.config.auto_create {
            let mut options = self.config.defaults.clone();
            if context.is_some() {
                options.derived = true;
            }
            // A request the new policy would reject must not create it.
            let admit = |candidate: &Policy| -> Result<()> {
                candidate.check_context(context)?;
                candidate.encryption_version(version)?;
                Ok(())
            };
            self.get_or_create_with(name, &options, LockMode::Shared, admit)
                .await?
        } else {
            self.get(name, LockMode::Shared).await?
        };

        let envelope = handle.encrypt(context, plaintext, version)?;
        debug!(name = handle.name(), version = envelope.version, "encrypted");
        Ok(envelope)
    }

    /// Decrypt an envelope produced by [`PolicyManager::encrypt`].
    pub async fn decrypt(
        &self,
        name: &str,
        context: Option<&[u8]>,
        envelope: &Envelope,
    ) -> Result<Vec<u8>> {
        let handle = self.get(name, LockMode::Shared).await?;
        let plaintext = handle.decrypt(context, envelope)?;
        debug!(name = handle.name(), version = envelope.version, "decrypted");
        Ok(plaintext)
    }

    /// Append a new key version. Returns the new version number.
    pub async fn rotate(&self, name: &str) -> Result<u32> {
        let (policy, version) = self.mutate(name, Policy::rotate).await?;
        info!(name = policy.name(), version, "rotated policy");
        Ok(version)
    }

    /// Raise the minimum decryption and/or encryption version.
    pub async fn retire(
        &self,
        name: &str,
        min_decryption_version: Option<u32>,
        min_encryption_version: Option<u32>,
    ) -> Result<PolicyInfo> {
        let (policy, ()) = self
            .mutate(name, |p| p.retire(min_decryption_version, min_encryption_version))
            .await?;
        info!(
            name = policy.name(),
            min_decryption_version = policy.min_decryption_version(),
            min_encryption_version = policy.min_encryption_version(),
            "retired key versions"
        );
        Ok(policy.info())
    }

    /// Generate a random data key and wrap it under `name`.
    ///
    /// The bit length is validated before any randomness is drawn, and the
    /// policy must already exist: data keys never create policies.
    pub async fn generate_data_key(
        &self,
        name: &str,
        context: Option<&[u8]>,
        bits: u32,
        mode: DataKeyMode,
    ) -> Result<DataKey> {
        let bits = DataKeyBits::try_from(bits)?;
        let handle = self.get(name, LockMode::Shared).await?;
        handle.check_context(context)?;

        let raw = Zeroizing::new(cipher::random_bytes(bits.byte_len())?);
        let encoded = Zeroizing::new(STANDARD.encode(raw.as_slice()));
        let envelope = handle.encrypt(context, encoded.as_bytes(), None)?;

        debug!(
            name = handle.name(),
            bits = bits.byte_len() * 8,
            ?mode,
            "generated data key"
        );

        Ok(DataKey {
            ciphertext: envelope.to_string(),
            plaintext: match mode {
                DataKeyMode::Plaintext => Some(encoded),
                DataKeyMode::Wrapped => None,
            },
        })
    }

    // -- Supplementary operations ------------------------------------------------

    /// Decrypt and re-encrypt under the latest version without returning the
    /// plaintext.
    pub async fn rewrap(
        &self,
        name: &str,
        context: Option<&[u8]>,
        envelope: &Envelope,
    ) -> Result<Envelope> {
        let handle = self.get(name, LockMode::Shared).await?;
        let plaintext = Zeroizing::new(handle.decrypt(context, envelope)?);
        let rewrapped = handle.encrypt(context, &plaintext, None)?;
        debug!(
            name = handle.name(),
            from = envelope.version,
            to = rewrapped.version,
            "rewrapped"
        );
        Ok(rewrapped)
    }

    /// Metadata for `name`, without key material.
    pub async fn read(&self, name: &str) -> Result<PolicyInfo> {
        Ok(self.get(name, LockMode::Shared).await?.info())
    }

    /// Names of all stored policies, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let keys = self.storage.list(codec::POLICY_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(codec::POLICY_PREFIX).map(str::to_string))
            .collect())
    }

    /// Toggle administrative flags.
    pub async fn update_config(&self, name: &str, update: ConfigUpdate) -> Result<PolicyInfo> {
        let (policy, ()) = self
            .mutate(name, |p| {
                if update.exportable == Some(false) && p.exportable {
                    return Err(TransitError::invalid(
                        "exportable cannot be disabled once enabled",
                    ));
                }
                if let Some(exportable) = update.exportable {
                    p.exportable = exportable;
                }
                if let Some(allowed) = update.deletion_allowed {
                    p.deletion_allowed = allowed;
                }
                Ok(())
            })
            .await?;
        info!(
            name = policy.name(),
            exportable = policy.exportable(),
            deletion_allowed = policy.deletion_allowed(),
            "updated policy config"
        );
        Ok(policy.info())
    }

    /// Release raw key bytes of an exportable policy.
    pub async fn export_key(&self, name: &str, version: Option<u32>) -> Result<ExportedKeys> {
        let handle = self.get(name, LockMode::Shared).await?;
        let keys = handle
            .export(version)?
            .into_iter()
            .map(|(v, key)| (v, STANDARD.encode(key.as_slice())))
            .collect();
        info!(name = handle.name(), ?version, "exported key material");
        Ok(ExportedKeys {
            name: handle.name().to_string(),
            key_type: handle.key_type(),
            keys,
        })
    }

    /// Permanently remove a policy whose `deletion_allowed` flag is set.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let name = normalize_name(name)?;
        let guard = self.acquire(&name, LockMode::Exclusive).await?;
        let Some(policy) = self.load_fresh(&name).await? else {
            return Err(self.not_found(name, guard));
        };
        if !policy.deletion_allowed() {
            return Err(TransitError::invalid(format!(
                "deletion is not allowed for policy {name}"
            )));
        }
        self.storage.delete(&codec::storage_key(&name)).await?;
        self.cache.invalidate(&name).await;
        info!(name = %name, "deleted policy");
        self.release_unused(&name, guard);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
