//! HMAC-SHA256 verification of inbound event bodies.
//!
//! The sender signs the raw body with the shared secret and sends
//! `X-Nudge-Signature: sha256=<hex>`. Verification runs before the body is
//! parsed.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-nudge-signature";

/// Parse `sha256=<hex>` into raw bytes. `None` for anything malformed.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("sha256=")?;
    hex::decode(hex_sig).ok()
}

/// `sha256=<hex>` header value for `payload` under `secret`.
pub fn sign(payload: &[u8], secret: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return String::new();
    };
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of `signature_header` against `payload`.
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(expected) = parse_signature_header(signature_header) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
