//! Application configuration parsed from environment variables
//!
//! Every option has a default and an acceptance predicate; invalid
//! configuration fails startup rather than the first request.

use std::collections::HashMap;
use std::env;

use crate::models::PaymentMethodType;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// "inmemory" or "postgres"
    pub store_type: String,
    pub database_url: Option<String>,

    /// "inmemory" or "nats"
    pub bus_type: String,
    pub nats_url: String,
    pub nats_stream: String,
    pub nats_subject: String,
    pub consumer_group: String,
    pub event_batch_size: usize,
    pub event_block_ms: u64,
    pub consumer_max_attempts: u32,

    /// Accepted bearer API keys
    pub api_keys: Vec<String>,

    /// Cursor signing secrets; the head signs, every entry verifies
    pub cursor_secrets: Vec<String>,

    pub rate_limit_window_seconds: u64,
    pub rate_limit_max_requests: u32,

    pub idempotency_ttl_seconds: i64,
    pub idempotency_key_max_length: usize,

    pub webhook_max_attempts: u32,
    pub webhook_timeout_ms: u64,
    pub provider_timeout_ms: u64,

    pub breaker_threshold: u32,
    pub breaker_cooldown_seconds: i64,
    pub breaker_transient_only: bool,

    pub default_provider: String,
    /// provider name -> base url, e.g. "provider_a=http://localhost:9401"
    pub provider_endpoints: HashMap<String, String>,
    /// payment method -> ordered provider priority list
    pub provider_priorities: HashMap<PaymentMethodType, Vec<String>>,

    pub risk_review_amount_threshold: i64,
    pub default_page_limit: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8095".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        let store_type = env::var("STORE_TYPE").unwrap_or_else(|_| "inmemory".to_string());
        if !matches!(store_type.as_str(), "inmemory" | "postgres") {
            return Err(format!(
                "STORE_TYPE must be 'inmemory' or 'postgres', got '{store_type}'"
            ));
        }
        let database_url = env::var("DATABASE_URL").ok();
        if store_type == "postgres" && database_url.is_none() {
            return Err("DATABASE_URL must be set when STORE_TYPE=postgres".to_string());
        }

        let bus_type = env::var("BUS_TYPE").unwrap_or_else(|_| "inmemory".to_string());
        if !matches!(bus_type.as_str(), "inmemory" | "nats") {
            return Err(format!(
                "BUS_TYPE must be 'inmemory' or 'nats', got '{bus_type}'"
            ));
        }
        let nats_url =
            env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
        let nats_stream =
            env::var("NATS_STREAM").unwrap_or_else(|_| "PAYMENTS_EVENTS".to_string());
        let nats_subject =
            env::var("NATS_SUBJECT").unwrap_or_else(|_| "payments.events".to_string());
        let consumer_group =
            env::var("CONSUMER_GROUP").unwrap_or_else(|_| "payments-service".to_string());

        let event_batch_size = parse_number("EVENT_BATCH_SIZE", 10)?;
        if event_batch_size == 0 {
            return Err("EVENT_BATCH_SIZE must be >= 1".to_string());
        }
        let event_block_ms = parse_number("EVENT_BLOCK_MS", 2000)?;
        let consumer_max_attempts = parse_number("CONSUMER_MAX_ATTEMPTS", 3)?;
        if consumer_max_attempts == 0 {
            return Err("CONSUMER_MAX_ATTEMPTS must be >= 1".to_string());
        }

        let api_keys = parse_list(&env::var("API_KEYS").unwrap_or_default());
        if api_keys.is_empty() {
            return Err("API_KEYS must contain at least one key".to_string());
        }

        let cursor_secrets = parse_list(&env::var("CURSOR_SECRETS").unwrap_or_default());
        if cursor_secrets.is_empty() {
            return Err("CURSOR_SECRETS must contain at least one secret".to_string());
        }

        let rate_limit_window_seconds = parse_number("RATE_LIMIT_WINDOW_SECONDS", 60)?;
        if rate_limit_window_seconds < 1 {
            return Err("RATE_LIMIT_WINDOW_SECONDS must be >= 1".to_string());
        }
        let rate_limit_max_requests = parse_number("RATE_LIMIT_MAX_REQUESTS", 100)?;
        if rate_limit_max_requests < 1 {
            return Err("RATE_LIMIT_MAX_REQUESTS must be >= 1".to_string());
        }

        let idempotency_ttl_seconds = parse_number("IDEMPOTENCY_TTL_SECONDS", 86_400)?;
        if idempotency_ttl_seconds < 60 {
            return Err("IDEMPOTENCY_TTL_SECONDS must be >= 60".to_string());
        }
        let idempotency_key_max_length = parse_number("IDEMPOTENCY_KEY_MAX_LENGTH", 255)?;
        if idempotency_key_max_length < 128 {
            // The API contract guarantees keys up to 128 characters
            return Err("IDEMPOTENCY_KEY_MAX_LENGTH must be >= 128".to_string());
        }

        let webhook_max_attempts = parse_number("WEBHOOK_MAX_ATTEMPTS", 3)?;
        if !(1..=10).contains(&webhook_max_attempts) {
            return Err("WEBHOOK_MAX_ATTEMPTS must be between 1 and 10".to_string());
        }
        let webhook_timeout_ms = parse_number("WEBHOOK_TIMEOUT_MS", 5000)?;
        if webhook_timeout_ms < 1 {
            return Err("WEBHOOK_TIMEOUT_MS must be >= 1".to_string());
        }
        let provider_timeout_ms = parse_number("PROVIDER_TIMEOUT_MS", 5000)?;
        if provider_timeout_ms < 1 {
            return Err("PROVIDER_TIMEOUT_MS must be >= 1".to_string());
        }

        let breaker_threshold = parse_number("BREAKER_THRESHOLD", 5)?;
        if breaker_threshold < 1 {
            return Err("BREAKER_THRESHOLD must be >= 1".to_string());
        }
        let breaker_cooldown_seconds = parse_number("BREAKER_COOLDOWN_SECONDS", 30)?;
        if breaker_cooldown_seconds < 1 {
            return Err("BREAKER_COOLDOWN_SECONDS must be >= 1".to_string());
        }
        let breaker_transient_only = env::var("BREAKER_TRANSIENT_ONLY")
            .map(|v| v != "false")
            .unwrap_or(true);

        let default_provider =
            env::var("DEFAULT_PROVIDER").unwrap_or_else(|_| "provider_a".to_string());
        let provider_endpoints =
            parse_map(&env::var("PROVIDER_ENDPOINTS").unwrap_or_default())?;
        let provider_priorities =
            parse_priorities(&env::var("PROVIDER_PRIORITIES").unwrap_or_default())?;

        let risk_review_amount_threshold =
            parse_number("RISK_REVIEW_AMOUNT_THRESHOLD", 1_000_000)?;
        if risk_review_amount_threshold < 1 {
            return Err("RISK_REVIEW_AMOUNT_THRESHOLD must be >= 1".to_string());
        }

        let default_page_limit = parse_number("DEFAULT_PAGE_LIMIT", 50)?;
        if !(1..=5000).contains(&default_page_limit) {
            return Err("DEFAULT_PAGE_LIMIT must be between 1 and 5000".to_string());
        }

        Ok(Config {
            host,
            port,
            store_type,
            database_url,
            bus_type,
            nats_url,
            nats_stream,
            nats_subject,
            consumer_group,
            event_batch_size,
            event_block_ms,
            consumer_max_attempts,
            api_keys,
            cursor_secrets,
            rate_limit_window_seconds,
            rate_limit_max_requests,
            idempotency_ttl_seconds,
            idempotency_key_max_length,
            webhook_max_attempts,
            webhook_timeout_ms,
            provider_timeout_ms,
            breaker_threshold,
            breaker_cooldown_seconds,
            breaker_transient_only,
            default_provider,
            provider_endpoints,
            provider_priorities,
            risk_review_amount_threshold,
            default_page_limit,
        })
    }
}

fn parse_number<T>(name: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr + Copy,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("{name} must be a valid number")),
        Err(_) => Ok(default),
    }
}

/// Comma-separated list, empty entries dropped
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// `name=value;name=value` pairs
fn parse_map(raw: &str) -> Result<HashMap<String, String>, String> {
    let mut map = HashMap::new();
    for pair in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("malformed map entry '{pair}', expected name=value"))?;
        map.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

/// `method=prov1,prov2;method=prov1` priority lists
fn parse_priorities(
    raw: &str,
) -> Result<HashMap<PaymentMethodType, Vec<String>>, String> {
    let mut map = HashMap::new();
    for pair in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (method, providers) = pair
            .split_once('=')
            .ok_or_else(|| format!("malformed priority entry '{pair}'"))?;
        let method = PaymentMethodType::parse(method.trim())
            .ok_or_else(|| format!("unknown payment method '{}'", method.trim()))?;
        map.insert(method, parse_list(providers));
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_drops_empty_entries() {
        assert_eq!(parse_list("a, b,,c"), vec!["a", "b", "c"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn parse_map_requires_pairs() {
        let map = parse_map("provider_a=http://a;provider_b=http://b").unwrap();
        assert_eq!(map["provider_a"], "http://a");
        assert!(parse_map("oops").is_err());
    }

    #[test]
    fn parse_priorities_maps_methods() {
        let map = parse_priorities("card=provider_b,provider_a;pix=provider_a").unwrap();
        assert_eq!(
            map[&PaymentMethodType::Card],
            vec!["provider_b", "provider_a"]
        );
        assert!(parse_priorities("teleport=x").is_err());
    }
}
