//! Per-call retry options.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::gateway::error::GatewayError;
use crate::resilience::circuit_breaker::CircuitBreakerOverrides;
use crate::resilience::retries::{OnRetry, RetryPolicy, ShouldRetry};

/// Caller overrides merged over the gateway's default retry policy.
///
/// Unset fields fall back to the live `GatewayConfig`. `timeout_ms` replaces
/// the per-operation-kind deadline.
#[derive(Clone, Default)]
pub struct RetryOptions {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub jitter_enabled: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub should_retry: Option<ShouldRetry<GatewayError>>,
    pub on_retry: Option<OnRetry<GatewayError>>,
    /// Guard every attempt with this registry breaker.
    pub circuit_breaker: Option<String>,
    pub circuit_overrides: Option<CircuitBreakerOverrides>,
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = Some(ms);
        self
    }

    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = Some(ms);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter_enabled = Some(enabled);
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn should_retry(
        mut self,
        should_retry: impl Fn(&GatewayError, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(should_retry));
        self
    }

    pub fn on_retry(
        mut self,
        on_retry: impl Fn(&GatewayError, u32, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Arc::new(on_retry));
        self
    }

    pub fn circuit_breaker(mut self, name: impl Into<String>) -> Self {
        self.circuit_breaker = Some(name.into());
        self
    }

    pub fn circuit_overrides(mut self, overrides: CircuitBreakerOverrides) -> Self {
        self.circuit_overrides = Some(overrides);
        self
    }

    /// Merge over `base`; `default_timeout_ms` is used unless `timeout_ms` is set.
    pub fn resolve(&self, base: &RetryPolicy, default_timeout_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            initial_delay_ms: self.initial_delay_ms.unwrap_or(base.initial_delay_ms),
            max_delay_ms: self.max_delay_ms.unwrap_or(base.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(base.backoff_multiplier),
            jitter_enabled: self.jitter_enabled.unwrap_or(base.jitter_enabled),
            timeout_ms: self.timeout_ms.unwrap_or(default_timeout_ms),
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay_ms", &self.initial_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter_enabled", &self.jitter_enabled)
            .field("timeout_ms", &self.timeout_ms)
            .field("should_retry", &self.should_retry.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .field("circuit_breaker", &self.circuit_breaker)
            .finish()
    }
}
