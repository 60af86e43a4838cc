//! Policy record serialization.
//!
//! Records are stored as JSON documents under `policy/<name>`. Key bytes are
//! base64-encoded inside the document. Decoding re-checks every policy
//! invariant, so a corrupted or hand-edited record surfaces as
//! [`TransitError::Internal`] instead of reaching the cipher.

use crate::error::{Result, TransitError};
use crate::policy::Policy;

/// Storage key prefix shared by all policy records.
pub const POLICY_PREFIX: &str = "policy/";

/// Storage key for an already-normalized policy name.
pub fn storage_key(name: &str) -> String {
    format!("{POLICY_PREFIX}{name}")
}

/// Serialize a policy for storage.
pub fn encode(policy: &Policy) -> Result<Vec<u8>> {
    policy
        .check_invariants()
        .map_err(|reason| TransitError::Internal(format!("refusing to persist policy: {reason}")))?;
    serde_json::to_vec(policy)
        .map_err(|e| TransitError::Internal(format!("failed to encode policy: {e}")))
}

/// Deserialize a stored policy and verify its invariants.
pub fn decode(bytes: &[u8]) -> Result<Policy> {
    let policy: Policy = serde_json::from_slice(bytes)
        .map_err(|e| TransitError::Internal(format!("corrupted policy record: {e}")))?;
    policy
        .check_invariants()
        .map_err(|reason| TransitError::Internal(format!("corrupted policy record: {reason}")))?;
    Ok(policy)
}

/// `serde(with = ...)` helper storing bytes as standard base64.
pub(crate) mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
