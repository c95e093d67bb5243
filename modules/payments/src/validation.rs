//! Request-level validators shared by the API surface and services
//!
//! Validators return `invalid_<field>` error codes (422) so the wire contract
//! stays stable regardless of which handler rejects the input.

use chrono::{DateTime, Utc};

use crate::error::{ApiError, ApiResult};

/// Uppercase 3-letter ISO currency code
pub fn validate_currency(raw: &str) -> ApiResult<String> {
    if raw.len() == 3 && raw.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(raw.to_string())
    } else {
        Err(ApiError::validation(
            "currency",
            format!("'{raw}' is not an uppercase 3-letter ISO currency code"),
        ))
    }
}

/// Strictly positive amount in minor units
pub fn validate_positive_amount(amount: i64, field: &str) -> ApiResult<()> {
    if amount > 0 {
        Ok(())
    } else {
        Err(ApiError::validation(
            field,
            "must be a positive integer in minor units",
        ))
    }
}

const IDEMPOTENCY_KEY_CHARS: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789._:-";

/// `Idempotency-Key` values: `[A-Za-z0-9._:-]+`, bounded length
pub fn validate_idempotency_key(key: &str, max_length: usize) -> ApiResult<()> {
    if key.is_empty() || key.len() > max_length {
        return Err(ApiError::invalid_idempotency_key(format!(
            "Idempotency-Key must be between 1 and {max_length} characters"
        )));
    }
    if !key.chars().all(|c| IDEMPOTENCY_KEY_CHARS.contains(c)) {
        return Err(ApiError::invalid_idempotency_key(
            "Idempotency-Key may only contain A-Z, a-z, 0-9, '.', '_', ':' and '-'",
        ));
    }
    Ok(())
}

/// Page size within 1..=5000
pub fn validate_limit(limit: Option<i64>, default: i64) -> ApiResult<i64> {
    let limit = limit.unwrap_or(default);
    if (1..=5000).contains(&limit) {
        Ok(limit)
    } else {
        Err(ApiError::validation("limit", "must be between 1 and 5000"))
    }
}

/// RFC3339 timestamp filter value
pub fn parse_timestamp(raw: &str, field: &str) -> ApiResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ApiError::validation(field, format!("'{raw}' is not an RFC3339 timestamp")))
}

/// Webhook endpoint url: http or https
pub fn validate_webhook_url(raw: &str) -> ApiResult<()> {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        Ok(())
    } else {
        Err(ApiError::validation("url", "must be an http(s) URL"))
    }
}

/// Wire-format check for cursor tokens before signature verification
pub fn cursor_token_shape_ok(token: &str) -> bool {
    let mut parts = token.split('.');
    let (Some(payload), Some(signature), None) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let b64url = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    };
    b64url(payload) && b64url(signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_must_be_upper_iso() {
        assert!(validate_currency("BRL").is_ok());
        assert!(validate_currency("brl").is_err());
        assert!(validate_currency("BRLX").is_err());
        assert_eq!(validate_currency("eu").unwrap_err().code, "invalid_currency");
    }

    #[test]
    fn idempotency_key_charset_and_length() {
        assert!(validate_idempotency_key("intent-001", 255).is_ok());
        assert!(validate_idempotency_key("a.b:c_d-e", 255).is_ok());
        assert!(validate_idempotency_key("", 255).is_err());
        assert!(validate_idempotency_key("bad key", 255).is_err());
        assert!(validate_idempotency_key(&"x".repeat(256), 255).is_err());
    }

    #[test]
    fn limit_bounds() {
        assert_eq!(validate_limit(None, 50).unwrap(), 50);
        assert_eq!(validate_limit(Some(5000), 50).unwrap(), 5000);
        assert!(validate_limit(Some(0), 50).is_err());
        assert!(validate_limit(Some(5001), 50).is_err());
    }

    #[test]
    fn cursor_shape() {
        assert!(cursor_token_shape_ok("abc_123.def-456"));
        assert!(!cursor_token_shape_ok("abc"));
        assert!(!cursor_token_shape_ok("a.b.c"));
        assert!(!cursor_token_shape_ok("a!.b"));
    }
}
