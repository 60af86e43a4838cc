//! Authenticated encryption with version-tagged envelopes, using `ring`.
//!
//! - **Algorithms**: AES-256-GCM or ChaCha20-Poly1305, both with 256-bit keys,
//!   96-bit nonces and 128-bit tags.
//! - **Nonces**: drawn from the system CSPRNG per call, or, for convergent
//!   encryption, the first 96 bits of `HMAC-SHA256(key, len(context) ||
//!   context || plaintext)` so identical inputs produce identical output.
//! - **Envelope**: `transit:v<version>:<base64(nonce || ciphertext || tag)>`.
//!   The version is authenticated as associated data, so an envelope whose
//!   version tag was altered fails to open.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, SealingKey, UnboundKey};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, TransitError};
use crate::policy::KeyType;

/// Length of every policy key, base or derived, in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AEAD nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the authentication tag appended by `ring`.
pub const TAG_LEN: usize = 16;

/// Leading label of the textual envelope form.
pub const ENVELOPE_PREFIX: &str = "transit";

fn algorithm(key_type: KeyType) -> &'static aead::Algorithm {
    match key_type {
        KeyType::Aes256Gcm96 => &aead::AES_256_GCM,
        KeyType::ChaCha20Poly1305 => &aead::CHACHA20_POLY1305,
    }
}

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// A nonce sequence that yields exactly one nonce and then errors, so each
/// bound key is used for a single operation.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

/// How [`seal`] obtains its nonce.
#[derive(Debug, Clone, Copy)]
pub enum NonceMode<'a> {
    /// Fresh random nonce per call.
    Random,
    /// Nonce derived from the key, context and plaintext.
    Convergent { context: &'a [u8] },
}

fn convergent_nonce(key: &[u8], context: &[u8], plaintext: &[u8]) -> [u8; NONCE_LEN_BYTES] {
    let mac_key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let mut ctx = hmac::Context::with_key(&mac_key);
    ctx.update(&(context.len() as u64).to_be_bytes());
    ctx.update(context);
    ctx.update(plaintext);
    let tag = ctx.sign();

    let mut nonce = [0u8; NONCE_LEN_BYTES];
    nonce.copy_from_slice(&tag.as_ref()[..NONCE_LEN_BYTES]);
    nonce
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Version-tagged ciphertext.
///
/// `ciphertext` holds `nonce || sealed plaintext || tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub version: u32,
    pub ciphertext: Vec<u8>,
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ENVELOPE_PREFIX}:v{}:{}",
            self.version,
            STANDARD.encode(&self.ciphertext)
        )
    }
}

impl FromStr for Envelope {
    type Err = TransitError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || TransitError::invalid("invalid ciphertext envelope");

        let mut parts = s.splitn(3, ':');
        let (Some(prefix), Some(tag), Some(body)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        if prefix != ENVELOPE_PREFIX {
            return Err(malformed());
        }

        let digits = tag.strip_prefix('v').ok_or_else(malformed)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let version: u32 = digits.parse().map_err(|_| malformed())?;
        if version == 0 {
            return Err(malformed());
        }

        let ciphertext = STANDARD.decode(body).map_err(|_| malformed())?;
        if ciphertext.len() < NONCE_LEN_BYTES + TAG_LEN {
            return Err(malformed());
        }

        Ok(Self {
            version,
            ciphertext,
        })
    }
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` under `key`, tagging the result with `version`.
///
/// # Errors
///
/// Returns [`TransitError::Crypto`] for a wrong-sized key or a sealing
/// failure and [`TransitError::Internal`] if the CSPRNG fails.
pub fn seal(
    key_type: KeyType,
    key: &[u8],
    plaintext: &[u8],
    version: u32,
    nonce_mode: NonceMode<'_>,
) -> Result<Envelope> {
    if key.len() != KEY_LEN {
        return Err(TransitError::Crypto(format!(
            "key must be {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }

    let nonce = match nonce_mode {
        NonceMode::Random => {
            let mut bytes = [0u8; NONCE_LEN_BYTES];
            SystemRandom::new()
                .fill(&mut bytes)
                .map_err(|_| TransitError::Internal("failed to generate random nonce".into()))?;
            bytes
        }
        NonceMode::Convergent { context } => convergent_nonce(key, context, plaintext),
    };

    let unbound = UnboundKey::new(algorithm(key_type), key)
        .map_err(|_| TransitError::Crypto("failed to create sealing key".into()))?;
    let mut sealing_key = SealingKey::new(unbound, SingleNonce(Some(nonce)));

    let mut ciphertext = Vec::with_capacity(NONCE_LEN_BYTES + plaintext.len() + TAG_LEN);
    ciphertext.extend_from_slice(&nonce);
    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::from(version.to_be_bytes()), &mut in_out)
        .map_err(|_| TransitError::Crypto("encryption failed".into()))?;
    ciphertext.extend_from_slice(&in_out);

    tracing::trace!(
        version,
        plaintext_len = plaintext.len(),
        ciphertext_len = ciphertext.len(),
        "sealed envelope"
    );

    Ok(Envelope {
        version,
        ciphertext,
    })
}

/// Decrypt an envelope sealed for `expected_version`.
///
/// # Errors
///
/// Returns [`TransitError::Crypto`] if the version tag differs from
/// `expected_version`, the envelope is truncated, or authentication fails.
/// No partial plaintext is ever returned.
pub fn open(
    key_type: KeyType,
    key: &[u8],
    envelope: &Envelope,
    expected_version: u32,
) -> Result<Vec<u8>> {
    let auth_failed = || TransitError::Crypto("message authentication failed".into());

    if key.len() != KEY_LEN {
        return Err(TransitError::Crypto(format!(
            "key must be {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    if envelope.version != expected_version {
        return Err(auth_failed());
    }
    if envelope.ciphertext.len() < NONCE_LEN_BYTES + TAG_LEN {
        return Err(auth_failed());
    }

    let (nonce_bytes, sealed) = envelope.ciphertext.split_at(NONCE_LEN_BYTES);
    let mut nonce = [0u8; NONCE_LEN_BYTES];
    nonce.copy_from_slice(nonce_bytes);

    let unbound = UnboundKey::new(algorithm(key_type), key)
        .map_err(|_| TransitError::Crypto("failed to create opening key".into()))?;
    let mut opening_key = aead::OpeningKey::new(unbound, SingleNonce(Some(nonce)));

    let mut in_out = sealed.to_vec();
    let plaintext = opening_key
        .open_in_place(Aad::from(expected_version.to_be_bytes()), &mut in_out)
        .map_err(|_| auth_failed())?;

    Ok(plaintext.to_vec())
}

// ---------------------------------------------------------------------------
// Random bytes
// ---------------------------------------------------------------------------

/// Generate `len` cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`TransitError::Internal`] if the system CSPRNG fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| TransitError::Internal("failed to generate random bytes".into()))?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
