//! Webhook signature verification
//!
//! Signatures are `sha256=<hex>` over the raw request body, keyed with the
//! repository's shared secret.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::errors::PlatformError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Check `header` against the payload; comparison is constant time
pub fn verify(
    secret: &SecretString,
    payload: &[u8],
    header: Option<&str>,
) -> Result<(), PlatformError> {
    let header =
        header.ok_or_else(|| PlatformError::Unauthorized("Missing webhook signature".to_string()))?;
    let digest = header
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .and_then(|hex_digest| hex::decode(hex_digest).ok())
        .ok_or_else(|| PlatformError::Unauthorized("Malformed webhook signature".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| PlatformError::Internal(format!("Invalid webhook secret: {}", e)))?;
    mac.update(payload);
    mac.verify_slice(&digest)
        .map_err(|_| PlatformError::Unauthorized("Invalid webhook signature".to_string()))
}

/// Signature header value for `payload`
pub fn sign(secret: &SecretString, payload: &[u8]) -> Result<String, PlatformError> {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| PlatformError::Internal(format!("Invalid webhook secret: {}", e)))?;
    mac.update(payload);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}
