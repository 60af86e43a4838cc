//! Data keys for envelope encryption.
//!
//! A data key is a fresh random key returned wrapped under a named policy,
//! and optionally also in plaintext. Callers encrypt bulk data locally with
//! the plaintext key, keep only the wrapped form, and ask the engine to
//! unwrap it later.

use std::str::FromStr;

use zeroize::Zeroizing;

use crate::error::{Result, TransitError};

/// Supported data key sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DataKeyBits {
    Bits128,
    #[default]
    Bits256,
    Bits512,
}

impl DataKeyBits {
    pub fn byte_len(self) -> usize {
        match self {
            Self::Bits128 => 16,
            Self::Bits256 => 32,
            Self::Bits512 => 64,
        }
    }
}

impl TryFrom<u32> for DataKeyBits {
    type Error = TransitError;

    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            128 => Ok(Self::Bits128),
            256 => Ok(Self::Bits256),
            512 => Ok(Self::Bits512),
            other => Err(TransitError::invalid(format!(
                "invalid bit length {other}: must be 128, 256 or 512"
            ))),
        }
    }
}

/// Whether the plaintext key is returned alongside the wrapped one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKeyMode {
    /// Return both plaintext and ciphertext.
    Plaintext,
    /// Return the ciphertext only.
    Wrapped,
}

impl FromStr for DataKeyMode {
    type Err = TransitError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plaintext" => Ok(Self::Plaintext),
            "wrapped" => Ok(Self::Wrapped),
            other => Err(TransitError::invalid(format!(
                "invalid data key mode {other:?}: must be 'plaintext' or 'wrapped'"
            ))),
        }
    }
}

/// A generated data key.
///
/// `plaintext` is the base64 encoding of the raw key and is `None` in
/// [`DataKeyMode::Wrapped`]. It is zeroized when the value is dropped.
pub struct DataKey {
    pub ciphertext: String,
    pub(crate) plaintext: Option<Zeroizing<String>>,
}

impl DataKey {
    /// The base64 plaintext key, if this key was generated in plaintext mode.
    pub fn plaintext(&self) -> Option<&str> {
        self.plaintext.as_deref().map(String::as_str)
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("ciphertext", &self.ciphertext)
            .field("plaintext", &self.plaintext.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
