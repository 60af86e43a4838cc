//! The policy record: versioned key material plus the metadata that governs
//! how it may be used.
//!
//! A [`Policy`] is plain data guarded by invariants. It never touches storage
//! or locks; the [`PolicyManager`](crate::manager::PolicyManager) owns every
//! instance and hands out immutable snapshots through
//! [`PolicyHandle`](crate::manager::PolicyHandle).
//!
//! Invariants upheld by every constructor and mutator, and re-checked when a
//! record is decoded from storage:
//!
//! - `versions` is non-empty and `versions[i].version == i + 1`;
//! - `latest_version == versions.len()`;
//! - `1 <= min_decryption_version <= min_encryption_version <= latest_version`;
//! - `convergent_encryption` implies `derived`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::cipher::{self, Envelope, KEY_LEN, NonceMode};
use crate::codec::base64_bytes;
use crate::derive;
use crate::error::{Result, TransitError};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// AEAD algorithm a policy encrypts with. Fixed for the policy's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// AES-256-GCM with a 96-bit nonce.
    #[default]
    #[serde(rename = "aes256-gcm96")]
    Aes256Gcm96,
    /// ChaCha20-Poly1305 (RFC 8439).
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl KeyType {
    /// The canonical string form, as stored and shown to callers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes256Gcm96 => "aes256-gcm96",
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    /// Parse the canonical string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aes256-gcm96" => Some(Self::Aes256Gcm96),
            "chacha20-poly1305" => Some(Self::ChaCha20Poly1305),
            _ => None,
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key derivation function used for derived policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KdfMode {
    /// HKDF-SHA256 (RFC 5869) with the context as `info`.
    #[default]
    #[serde(rename = "hkdf_sha256")]
    HkdfSha256,
    /// NIST SP 800-108 counter mode with HMAC-SHA256 as the PRF.
    #[serde(rename = "hmac-sha256-counter")]
    HmacSha256Counter,
}

impl KdfMode {
    /// The canonical string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HkdfSha256 => "hkdf_sha256",
            Self::HmacSha256Counter => "hmac-sha256-counter",
        }
    }

    /// Parse the canonical string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hkdf_sha256" => Some(Self::HkdfSha256),
            "hmac-sha256-counter" => Some(Self::HmacSha256Counter),
            _ => None,
        }
    }
}

impl std::fmt::Display for KdfMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Creation-time settings for a new policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOptions {
    pub key_type: KeyType,
    /// Require a context on every call and encrypt under a derived key.
    pub derived: bool,
    pub kdf: KdfMode,
    /// Deterministic encryption per (context, plaintext). Needs `derived`.
    pub convergent_encryption: bool,
    /// Allow raw key bytes to be exported.
    pub exportable: bool,
    /// Allow the administrative delete.
    pub deletion_allowed: bool,
}

impl PolicyOptions {
    /// Reject combinations that would violate a policy invariant.
    pub fn validate(&self) -> Result<()> {
        if self.convergent_encryption && !self.derived {
            return Err(TransitError::invalid(
                "convergent encryption requires a derived policy",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Key versions
// ---------------------------------------------------------------------------

/// One version of a policy's key material. Zeroized on drop.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyEntry {
    pub version: u32,
    #[serde(with = "base64_bytes")]
    pub(crate) key: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl KeyEntry {
    fn generate(version: u32) -> Result<Self> {
        Ok(Self {
            version,
            key: cipher::random_bytes(KEY_LEN)?,
            created_at: Utc::now(),
        })
    }
}

impl Drop for KeyEntry {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEntry")
            .field("version", &self.version)
            .field("key", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// A named, versioned key policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub(crate) name: String,
    pub(crate) key_type: KeyType,
    pub(crate) versions: Vec<KeyEntry>,
    pub(crate) latest_version: u32,
    pub(crate) min_decryption_version: u32,
    pub(crate) min_encryption_version: u32,
    pub(crate) derived: bool,
    pub(crate) kdf: KdfMode,
    pub(crate) convergent_encryption: bool,
    pub(crate) exportable: bool,
    pub(crate) deletion_allowed: bool,
}

/// Lower-case and trim a policy name, rejecting unusable names.
pub fn normalize_name(name: &str) -> Result<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(TransitError::invalid("policy name must not be empty"));
    }
    if name.contains('/') {
        return Err(TransitError::invalid("policy name must not contain '/'"));
    }
    Ok(name)
}

impl Policy {
    /// Build a fresh policy holding version 1 with newly generated key bytes.
    pub(crate) fn new(name: &str, options: &PolicyOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            name: normalize_name(name)?,
            key_type: options.key_type,
            versions: vec![KeyEntry::generate(1)?],
            latest_version: 1,
            min_decryption_version: 1,
            min_encryption_version: 1,
            derived: options.derived,
            kdf: options.kdf,
            convergent_encryption: options.convergent_encryption,
            exportable: options.exportable,
            deletion_allowed: options.deletion_allowed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn latest_version(&self) -> u32 {
        self.latest_version
    }

    pub fn min_decryption_version(&self) -> u32 {
        self.min_decryption_version
    }

    pub fn min_encryption_version(&self) -> u32 {
        self.min_encryption_version
    }

    pub fn derived(&self) -> bool {
        self.derived
    }

    pub fn kdf(&self) -> KdfMode {
        self.kdf
    }

    pub fn convergent_encryption(&self) -> bool {
        self.convergent_encryption
    }

    pub fn exportable(&self) -> bool {
        self.exportable
    }

    pub fn deletion_allowed(&self) -> bool {
        self.deletion_allowed
    }

    /// Metadata snapshot without key material.
    pub fn info(&self) -> PolicyInfo {
        PolicyInfo {
            name: self.name.clone(),
            key_type: self.key_type,
            latest_version: self.latest_version,
            min_decryption_version: self.min_decryption_version,
            min_encryption_version: self.min_encryption_version,
            derived: self.derived,
            kdf: self.kdf,
            convergent_encryption: self.convergent_encryption,
            exportable: self.exportable,
            deletion_allowed: self.deletion_allowed,
            versions: self
                .versions
                .iter()
                .map(|e| (e.version, e.created_at))
                .collect(),
        }
    }

    /// Describe the first violated invariant, if any.
    pub(crate) fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.versions.is_empty() {
            return Err("policy has no key versions".into());
        }
        for (index, entry) in self.versions.iter().enumerate() {
            if entry.version as usize != index + 1 {
                return Err(format!(
                    "version sequence broken at index {index}: found v{}",
                    entry.version
                ));
            }
            if entry.key.len() != KEY_LEN {
                return Err(format!(
                    "version {} holds a {}-byte key",
                    entry.version,
                    entry.key.len()
                ));
            }
        }
        if self.latest_version as usize != self.versions.len() {
            return Err(format!(
                "latest_version {} does not match {} stored versions",
                self.latest_version,
                self.versions.len()
            ));
        }
        if !(1 <= self.min_decryption_version
            && self.min_decryption_version <= self.min_encryption_version
            && self.min_encryption_version <= self.latest_version)
        {
            return Err(format!(
                "version bounds out of order: min_decryption={} min_encryption={} latest={}",
                self.min_decryption_version, self.min_encryption_version, self.latest_version
            ));
        }
        if self.convergent_encryption && !self.derived {
            return Err("convergent encryption without derivation".into());
        }
        if normalize_name(&self.name).ok().as_deref() != Some(self.name.as_str()) {
            return Err(format!("name {:?} is not normalized", self.name));
        }
        Ok(())
    }

    // -- Mutation -----------------------------------------------------------

    /// Append a new key version and make it the latest. Returns its number.
    ///
    /// The key is generated before anything is modified, so a failed RNG
    /// call leaves the policy untouched.
    pub(crate) fn rotate(&mut self) -> Result<u32> {
        let next = self
            .latest_version
            .checked_add(1)
            .ok_or_else(|| TransitError::Internal("key version counter overflow".into()))?;
        let entry = KeyEntry::generate(next)?;
        self.versions.push(entry);
        self.latest_version = next;
        Ok(next)
    }

    /// Raise the minimum decryption and/or encryption version.
    ///
    /// Bounds only move forward and must keep
    /// `min_decryption_version <= min_encryption_version <= latest_version`.
    pub(crate) fn retire(
        &mut self,
        min_decryption_version: Option<u32>,
        min_encryption_version: Option<u32>,
    ) -> Result<()> {
        let dec = min_decryption_version.unwrap_or(self.min_decryption_version);
        let enc = min_encryption_version.unwrap_or(self.min_encryption_version);

        if dec < self.min_decryption_version {
            return Err(TransitError::invalid(format!(
                "min_decryption_version cannot be lowered from {} to {dec}",
                self.min_decryption_version
            )));
        }
        if enc < self.min_encryption_version {
            return Err(TransitError::invalid(format!(
                "min_encryption_version cannot be lowered from {} to {enc}",
                self.min_encryption_version
            )));
        }
        if enc > self.latest_version {
            return Err(TransitError::invalid(format!(
                "min_encryption_version {enc} exceeds latest version {}",
                self.latest_version
            )));
        }
        if dec > enc {
            return Err(TransitError::invalid(format!(
                "min_decryption_version {dec} exceeds min_encryption_version {enc}"
            )));
        }

        self.min_decryption_version = dec;
        self.min_encryption_version = enc;
        Ok(())
    }

    // -- Key resolution -----------------------------------------------------

    /// Validate the caller's context against the policy's `derived` flag.
    pub fn check_context<'a>(&self, context: Option<&'a [u8]>) -> Result<Option<&'a [u8]>> {
        match (self.derived, context) {
            (true, None) => Err(TransitError::invalid(
                "context is required for a derived policy",
            )),
            (true, Some(ctx)) if ctx.is_empty() => Err(TransitError::invalid(
                "context must not be empty for a derived policy",
            )),
            (false, Some(_)) => Err(TransitError::invalid(
                "context supplied for a policy that is not derived",
            )),
            (_, context) => Ok(context),
        }
    }

    /// Pick the version a new encryption should use.
    pub fn encryption_version(&self, pinned: Option<u32>) -> Result<u32> {
        match pinned {
            None => Ok(self.latest_version),
            Some(v) if v < self.min_encryption_version => Err(TransitError::invalid(format!(
                "version {v} is below min_encryption_version {}",
                self.min_encryption_version
            ))),
            Some(v) if v > self.latest_version => Err(TransitError::invalid(format!(
                "version {v} does not exist"
            ))),
            Some(v) => Ok(v),
        }
    }

    fn check_decryption_version(&self, version: u32) -> Result<()> {
        if version < self.min_decryption_version {
            return Err(TransitError::invalid(format!(
                "ciphertext version {version} is retired (min_decryption_version {})",
                self.min_decryption_version
            )));
        }
        if version > self.latest_version {
            return Err(TransitError::invalid(format!(
                "ciphertext version {version} does not exist"
            )));
        }
        Ok(())
    }

    fn base_key(&self, version: u32) -> Result<&[u8]> {
        version
            .checked_sub(1)
            .and_then(|i| self.versions.get(i as usize))
            .map(|e| e.key.as_slice())
            .ok_or_else(|| TransitError::invalid(format!("version {version} does not exist")))
    }

    /// Resolve the key for `version`, deriving it from `context` when given.
    ///
    /// Callers must pass the context through [`Policy::check_context`] first.
    fn resolve_key(&self, version: u32, context: Option<&[u8]>) -> Result<Zeroizing<Vec<u8>>> {
        let base = self.base_key(version)?;
        match context {
            Some(ctx) => derive::derive(base, ctx, self.kdf),
            None => Ok(Zeroizing::new(base.to_vec())),
        }
    }

    /// Raw key bytes for the usable versions, for export.
    pub(crate) fn export(&self, version: Option<u32>) -> Result<BTreeMap<u32, Zeroizing<Vec<u8>>>> {
        if !self.exportable {
            return Err(TransitError::invalid(format!(
                "policy {} is not exportable",
                self.name
            )));
        }
        let range = match version {
            Some(v) => {
                self.check_decryption_version(v)?;
                v..=v
            }
            None => self.min_decryption_version..=self.latest_version,
        };
        range
            .map(|v| -> Result<(u32, Zeroizing<Vec<u8>>)> {
                Ok((v, Zeroizing::new(self.base_key(v)?.to_vec())))
            })
            .collect()
    }

    // -- Encryption ---------------------------------------------------------

    /// Encrypt `plaintext` under this snapshot of the policy.
    pub fn encrypt(
        &self,
        context: Option<&[u8]>,
        plaintext: &[u8],
        pinned_version: Option<u32>,
    ) -> Result<Envelope> {
        let context = self.check_context(context)?;
        let version = self.encryption_version(pinned_version)?;
        let key = self.resolve_key(version, context)?;

        let nonce = match (self.convergent_encryption, context) {
            (true, Some(ctx)) => NonceMode::Convergent { context: ctx },
            _ => NonceMode::Random,
        };
        cipher::seal(self.key_type, &key, plaintext, version, nonce)
    }

    /// Decrypt an envelope produced by [`Policy::encrypt`].
    pub fn decrypt(&self, context: Option<&[u8]>, envelope: &Envelope) -> Result<Vec<u8>> {
        let context = self.check_context(context)?;
        self.check_decryption_version(envelope.version)?;
        let key = self.resolve_key(envelope.version, context)?;
        cipher::open(self.key_type, &key, envelope, envelope.version)
    }
}

/// Public view of a policy's metadata. Contains no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInfo {
    pub name: String,
    pub key_type: KeyType,
    pub latest_version: u32,
    pub min_decryption_version: u32,
    pub min_encryption_version: u32,
    pub derived: bool,
    pub kdf: KdfMode,
    pub convergent_encryption: bool,
    pub exportable: bool,
    pub deletion_allowed: bool,
    /// Creation time of every version, keyed by version number.
    pub versions: BTreeMap<u32, DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
