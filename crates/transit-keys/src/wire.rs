//! Request/response shapes for a thin transport layer.
//!
//! These types mirror what an HTTP or RPC front end would exchange with the
//! engine: plaintexts and contexts travel as base64 strings, ciphertexts as
//! envelope strings. Handlers decode, call the [`PolicyManager`], and encode
//! the result; errors become an [`ErrorResponse`] that never carries internal
//! detail.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::cipher::Envelope;
use crate::datakey::DataKeyMode;
use crate::error::{Result, TransitError};
use crate::manager::PolicyManager;

/// Default data key size when the request omits `bits`.
pub const DEFAULT_DATA_KEY_BITS: u32 = 256;

/// Decode an optional base64 context. An empty string means "no context".
pub fn decode_context(context: Option<&str>) -> Result<Option<Vec<u8>>> {
    match context {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => STANDARD
            .decode(raw)
            .map(Some)
            .map_err(|_| TransitError::invalid("failed to decode context as base64")),
    }
}

fn decode_plaintext(plaintext: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(plaintext)
        .map_err(|_| TransitError::invalid("failed to decode plaintext as base64"))
}

// ---------------------------------------------------------------------------
// Data keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataKeyRequest {
    pub name: String,
    /// `"plaintext"` or `"wrapped"`.
    pub mode: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub bits: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataKeyResponse {
    pub ciphertext: String,
    /// Absent, not null, in wrapped mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plaintext: Option<String>,
}

pub async fn handle_datakey(manager: &PolicyManager, req: &DataKeyRequest) -> Result<DataKeyResponse> {
    let mode: DataKeyMode = req.mode.parse()?;
    let context = decode_context(req.context.as_deref())?;
    let key = manager
        .generate_data_key(
            &req.name,
            context.as_deref(),
            req.bits.unwrap_or(DEFAULT_DATA_KEY_BITS),
            mode,
        )
        .await?;

    let plaintext = key.plaintext().map(str::to_string);
    Ok(DataKeyResponse {
        ciphertext: key.ciphertext.clone(),
        plaintext,
    })
}

// ---------------------------------------------------------------------------
// Encrypt / decrypt / rewrap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptRequest {
    pub name: String,
    /// Base64 plaintext.
    pub plaintext: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub key_version: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiphertextResponse {
    pub ciphertext: String,
}

pub async fn handle_encrypt(manager: &PolicyManager, req: &EncryptRequest) -> Result<CiphertextResponse> {
    let context = decode_context(req.context.as_deref())?;
    let plaintext = zeroize::Zeroizing::new(decode_plaintext(&req.plaintext)?);
    let envelope = manager
        .encrypt_with_version(&req.name, context.as_deref(), &plaintext, req.key_version)
        .await?;
    Ok(CiphertextResponse {
        ciphertext: envelope.to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptRequest {
    pub name: String,
    pub ciphertext: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptResponse {
    /// Base64 plaintext.
    pub plaintext: String,
}

pub async fn handle_decrypt(manager: &PolicyManager, req: &DecryptRequest) -> Result<DecryptResponse> {
    let envelope: Envelope = req.ciphertext.parse()?;
    let context = decode_context(req.context.as_deref())?;
    let plaintext = zeroize::Zeroizing::new(
        manager
            .decrypt(&req.name, context.as_deref(), &envelope)
            .await?,
    );
    Ok(DecryptResponse {
        plaintext: STANDARD.encode(plaintext.as_slice()),
    })
}

pub async fn handle_rewrap(manager: &PolicyManager, req: &DecryptRequest) -> Result<CiphertextResponse> {
    let envelope: Envelope = req.ciphertext.parse()?;
    let context = decode_context(req.context.as_deref())?;
    let rewrapped = manager
        .rewrap(&req.name, context.as_deref(), &envelope)
        .await?;
    Ok(CiphertextResponse {
        ciphertext: rewrapped.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// Structured error payload. Internal failures are reported generically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl From<&TransitError> for ErrorResponse {
    fn from(err: &TransitError) -> Self {
        let message = match err {
            TransitError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        Self {
            error: ErrorBody {
                kind: err.kind().to_string(),
                message,
            },
        }
    }
}
