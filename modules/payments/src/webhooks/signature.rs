//! Webhook payload signing
//!
//! Receivers verify `X-PMC-Signature` = hex HMAC-SHA256 over
//! `timestamp + "." + body` with the endpoint secret.
//! `X-PMC-Signature-Key-Id` identifies which secret signed without exposing
//! it: `whk_` + first 12 hex chars of SHA-256(secret).

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub fn sign(secret: &str, timestamp: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn key_id(secret: &str) -> String {
    let digest = hex::encode(Sha256::digest(secret.as_bytes()));
    format!("whk_{}", &digest[..12])
}

/// Constant-time verification helper for receiver-side tests
pub fn verify(secret: &str, timestamp: &str, body: &str, signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    mac.verify_slice(&signature).is_ok()
}
