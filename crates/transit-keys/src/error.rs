//! Transit error types.
//!
//! Every public API in this crate returns [`TransitError`]. The variants form
//! a closed taxonomy so the request layer can map them to responses without
//! inspecting message strings.

use transit_store::StoreError;

/// Unified error type for the transit engine.
#[derive(Debug, thiserror::Error)]
pub enum TransitError {
    /// Bad caller input: missing or unexpected context, unsupported bit
    /// length, malformed envelope, retired version, invalid options.
    /// Never accompanied by a state change.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation needs a policy that does not exist.
    #[error("policy not found: {name}")]
    NotFound { name: String },

    /// The policy lock could not be acquired before the timeout elapsed.
    #[error("policy is busy: {name}")]
    Busy { name: String },

    /// Authentication failed or a primitive rejected its input. The message
    /// never says which part of the ciphertext mismatched.
    #[error("cryptographic failure: {0}")]
    Crypto(String),

    /// Storage failure, RNG failure, or a corrupted stored record.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TransitError {
    /// Short machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound { .. } => "not_found",
            Self::Busy { .. } => "busy",
            Self::Crypto(_) => "crypto_error",
            Self::Internal(_) => "internal_error",
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }
}

impl From<StoreError> for TransitError {
    fn from(err: StoreError) -> Self {
        Self::Internal(format!("storage: {err}"))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TransitError>;
