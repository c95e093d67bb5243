//! Signed opaque pagination cursors
//!
//! Tokens have the shape `base64url(payload).base64url(hmac_sha256)` with
//! payload `{"v":1,"c":"<internal cursor>"}`. The head secret signs; every
//! configured secret verifies, which allows zero-downtime rotation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{ApiError, ApiResult};

type HmacSha256 = Hmac<Sha256>;

const CURSOR_CHARS: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789._:-";

#[derive(Debug, Serialize, Deserialize)]
struct CursorPayload {
    v: u8,
    c: String,
}

pub struct CursorSigner {
    /// Head signs; every entry verifies
    secrets: Vec<Vec<u8>>,
}

impl CursorSigner {
    pub fn new(secrets: &[String]) -> Self {
        Self {
            secrets: secrets.iter().map(|s| s.as_bytes().to_vec()).collect(),
        }
    }

    fn mac(secret: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    /// Encode an internal cursor (a resource id) as an opaque signed token
    pub fn encode(&self, cursor: &str) -> String {
        let payload = serde_json::to_vec(&CursorPayload {
            v: 1,
            c: cursor.to_string(),
        })
        .expect("cursor payload serializes");
        let signature = Self::mac(&self.secrets[0], &payload);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// Verify and decode a token back to the internal cursor
    ///
    /// Any malformation (shape, signature, payload, charset) maps to
    /// `invalid_cursor`.
    pub fn decode(&self, token: &str) -> ApiResult<String> {
        let (payload_b64, signature_b64) = token
            .split_once('.')
            .ok_or_else(ApiError::invalid_cursor)?;
        if signature_b64.contains('.') {
            return Err(ApiError::invalid_cursor());
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| ApiError::invalid_cursor())?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| ApiError::invalid_cursor())?;

        // Try each verification secret; Mac::verify_slice is constant-time
        let verified = self.secrets.iter().any(|secret| {
            let mut mac =
                HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
            mac.update(&payload);
            mac.verify_slice(&signature).is_ok()
        });
        if !verified {
            return Err(ApiError::invalid_cursor());
        }

        let payload: CursorPayload =
            serde_json::from_slice(&payload).map_err(|_| ApiError::invalid_cursor())?;
        if payload.v != 1
            || payload.c.is_empty()
            || !payload.c.chars().all(|c| CURSOR_CHARS.contains(c))
        {
            return Err(ApiError::invalid_cursor());
        }

        Ok(payload.c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> CursorSigner {
        CursorSigner::new(&["current-secret".to_string()])
    }

    #[test]
    fn round_trip() {
        let signer = signer();
        for cursor in ["pi_0123abcd", "evt_f00d", "a.b:c_d-e"] {
            let token = signer.encode(cursor);
            assert_eq!(signer.decode(&token).unwrap(), cursor);
        }
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let signer = signer();
        let token = signer.encode("pi_0123abcd");
        let (payload, signature) = token.split_once('.').unwrap();

        let mut bytes: Vec<char> = signature.chars().collect();
        bytes[0] = if bytes[0] == 'A' { 'B' } else { 'A' };
        let tampered: String = bytes.into_iter().collect();

        let err = signer.decode(&format!("{payload}.{tampered}")).unwrap_err();
        assert_eq!(err.code, "invalid_cursor");
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let signer = signer();
        let token = signer.encode("pi_0123abcd");
        let (_, signature) = token.split_once('.').unwrap();
        let forged_payload =
            URL_SAFE_NO_PAD.encode(br#"{"v":1,"c":"pi_other"}"#);
        assert!(signer.decode(&format!("{forged_payload}.{signature}")).is_err());
    }

    #[test]
    fn rotation_old_tokens_still_verify() {
        let old = CursorSigner::new(&["old-secret".to_string()]);
        let token = old.encode("re_42");

        let rotated =
            CursorSigner::new(&["new-secret".to_string(), "old-secret".to_string()]);
        assert_eq!(rotated.decode(&token).unwrap(), "re_42");

        // New tokens are signed with the head secret and fail against a
        // signer that only knows the old one
        let new_token = rotated.encode("re_42");
        assert!(old.decode(&new_token).is_err());
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let signer = signer();
        for token in ["", "nodot", "a.b.c", "!!!.###"] {
            assert!(signer.decode(token).is_err(), "token {token:?}");
        }
    }
}
