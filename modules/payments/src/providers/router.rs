//! Candidate selection with circuit-breaker gating
//!
//! Candidate order for a payment method: the configured priority list, then
//! the default provider if not already listed, filtered to gateways that
//! support the method. An empty list is `provider_not_available` (422);
//! a list emptied by open breakers is `provider_circuit_open` (503).

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{ApiError, ApiResult};
use crate::models::PaymentMethodType;
use crate::providers::{is_transient_failure, ProviderGateway, ProviderResponse};

#[derive(Debug, Default, Clone)]
struct BreakerState {
    consecutive_failures: u32,
    opened_until: Option<DateTime<Utc>>,
}

/// Per-provider failure tracking
///
/// A provider is open iff `now < opened_until`; the transition back to
/// closed is implicit and lazy on the next selection.
pub struct CircuitBreaker {
    states: DashMap<String, BreakerState>,
    threshold: u32,
    cooldown: Duration,
    /// When true, non-transient declines clear the counter instead of
    /// tripping the breaker
    transient_only: bool,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(
        threshold: u32,
        cooldown_seconds: i64,
        transient_only: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            states: DashMap::new(),
            threshold,
            cooldown: Duration::seconds(cooldown_seconds),
            transient_only,
            clock,
        }
    }

    pub fn is_open(&self, provider: &str) -> bool {
        match self.states.get(provider) {
            Some(state) => state
                .opened_until
                .is_some_and(|until| self.clock.now() < until),
            None => false,
        }
    }

    pub fn record_success(&self, provider: &str) {
        self.states.remove(provider);
    }

    pub fn record_failure(&self, provider: &str, failure_code: Option<&str>) {
        let transient = failure_code.is_some_and(is_transient_failure);
        if self.transient_only && !transient {
            // A decline proves the provider is reachable
            self.states.remove(provider);
            return;
        }

        let mut state = self.states.entry(provider.to_string()).or_default();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            let opened_until = self.clock.now() + self.cooldown;
            state.opened_until = Some(opened_until);
            state.consecutive_failures = 0;
            tracing::warn!(
                provider = %provider,
                opened_until = %opened_until,
                "circuit breaker opened"
            );
        }
    }
}

pub struct ProviderRouter {
    gateways: HashMap<String, Arc<dyn ProviderGateway>>,
    priorities: HashMap<PaymentMethodType, Vec<String>>,
    default_provider: String,
    breaker: CircuitBreaker,
}

impl ProviderRouter {
    pub fn new(
        gateways: Vec<Arc<dyn ProviderGateway>>,
        priorities: HashMap<PaymentMethodType, Vec<String>>,
        default_provider: String,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            gateways: gateways
                .into_iter()
                .map(|g| (g.name().to_string(), g))
                .collect(),
            priorities,
            default_provider,
            breaker,
        }
    }

    /// Ordered, breaker-gated candidates for a payment method
    pub fn candidates(
        &self,
        method: PaymentMethodType,
    ) -> ApiResult<Vec<Arc<dyn ProviderGateway>>> {
        let mut names: Vec<&str> = self
            .priorities
            .get(&method)
            .map(|list| list.iter().map(String::as_str).collect())
            .unwrap_or_default();
        if !names.contains(&self.default_provider.as_str()) {
            names.push(&self.default_provider);
        }

        let supported: Vec<Arc<dyn ProviderGateway>> = names
            .iter()
            .filter_map(|name| self.gateways.get(*name))
            .filter(|gateway| gateway.supports(method))
            .cloned()
            .collect();
        if supported.is_empty() {
            return Err(ApiError::provider_not_available());
        }

        let available: Vec<Arc<dyn ProviderGateway>> = supported
            .into_iter()
            .filter(|gateway| !self.breaker.is_open(gateway.name()))
            .collect();
        if available.is_empty() {
            return Err(ApiError::provider_circuit_open());
        }

        Ok(available)
    }

    /// Gateway lookup by provider name (capture/refund follow the intent's
    /// recorded provider, not the candidate order)
    pub fn gateway(&self, name: &str) -> Option<Arc<dyn ProviderGateway>> {
        self.gateways.get(name).cloned()
    }

    /// Breaker bookkeeping for an observed provider outcome
    pub fn record_outcome(&self, provider: &str, response: &ProviderResponse) {
        if response.ok {
            self.breaker.record_success(provider);
        } else {
            self.breaker
                .record_failure(provider, response.failure_code.as_deref());
        }
    }
}
