//! Per-context key derivation.
//!
//! Derived policies never encrypt under a version's base key directly. Each
//! call derives a 256-bit sub-key from `(base_key, context)`, so tenants
//! sharing one policy are cryptographically isolated from each other. The
//! derivation is deterministic, which convergent encryption and later
//! decryption both depend on.

use ring::{hkdf, hmac};
use zeroize::Zeroizing;

use crate::cipher::KEY_LEN;
use crate::error::{Result, TransitError};
use crate::policy::KdfMode;

/// Output length marker for `ring`'s HKDF expand step.
struct OutputLen(usize);

impl hkdf::KeyType for OutputLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// Derive a [`KEY_LEN`]-byte sub-key from `base_key` and `context`.
///
/// # Errors
///
/// Returns [`TransitError::InvalidArgument`] for an empty context and
/// [`TransitError::Crypto`] if `ring` rejects the expansion.
pub fn derive(base_key: &[u8], context: &[u8], kdf: KdfMode) -> Result<Zeroizing<Vec<u8>>> {
    if context.is_empty() {
        return Err(TransitError::invalid("derivation context must not be empty"));
    }

    let key = match kdf {
        KdfMode::HkdfSha256 => hkdf_sha256(base_key, context)?,
        KdfMode::HmacSha256Counter => counter_mode(base_key, context),
    };

    tracing::trace!(kdf = %kdf, context_len = context.len(), "derived context key");
    Ok(key)
}

fn hkdf_sha256(base_key: &[u8], context: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]).extract(base_key);
    let info = [context];
    let okm = prk
        .expand(&info, OutputLen(KEY_LEN))
        .map_err(|_| TransitError::Crypto("key derivation failed".into()))?;

    let mut out = Zeroizing::new(vec![0u8; KEY_LEN]);
    okm.fill(&mut out[..])
        .map_err(|_| TransitError::Crypto("key derivation failed".into()))?;
    Ok(out)
}

/// SP 800-108 counter mode: `K(i) = HMAC(key, be32(i) || label || 0x00 || be32(L))`.
fn counter_mode(base_key: &[u8], context: &[u8]) -> Zeroizing<Vec<u8>> {
    let prf = hmac::Key::new(hmac::HMAC_SHA256, base_key);
    let output_bits = (KEY_LEN as u32) * 8;

    let mut out = Zeroizing::new(Vec::with_capacity(KEY_LEN + 32));
    let mut counter: u32 = 1;
    while out.len() < KEY_LEN {
        let mut ctx = hmac::Context::with_key(&prf);
        ctx.update(&counter.to_be_bytes());
        ctx.update(context);
        ctx.update(&[0x00]);
        ctx.update(&output_bits.to_be_bytes());
        out.extend_from_slice(ctx.sign().as_ref());
        counter += 1;
    }
    out.truncate(KEY_LEN);
    out
}
