//! Named circuit breaker registry.
//!
//! # Responsibilities
//! - Hold one breaker per logical resource name
//! - Create breakers lazily from registry defaults plus per-call overrides
//! - Tear breakers down (timers, listeners) on removal
//!
//! # Design Decisions
//! - The first caller's effective config wins; later overrides are ignored
//! - Owned by the composition root and shared via `Arc`, never a global

use std::sync::Arc;

use dashmap::DashMap;

use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerOverrides, CircuitMetrics,
};

/// Keyed collection of circuit breakers.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
        }
    }

    pub fn defaults(&self) -> &CircuitBreakerConfig {
        &self.defaults
    }

    /// Return the breaker for `name`, creating it on first use.
    pub fn get(&self, name: &str, overrides: Option<&CircuitBreakerOverrides>) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }

        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            let config = overrides
                .map(|o| o.apply(&self.defaults))
                .unwrap_or_else(|| self.defaults.clone());
            tracing::debug!(
                circuit = %name,
                failure_threshold = config.failure_threshold,
                reset_timeout_ms = config.reset_timeout_ms,
                "Circuit breaker created"
            );
            CircuitBreaker::new(name, config)
        });
        Arc::clone(entry.value())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.breakers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Metrics for every breaker, sorted by name.
    pub fn metrics(&self) -> Vec<CircuitMetrics> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| Arc::clone(e.value())).collect();
        let mut metrics: Vec<CircuitMetrics> = breakers.iter().map(|b| b.metrics()).collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    /// Destroy and evict one breaker. Returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        match self.breakers.remove(name) {
            Some((_, breaker)) => {
                breaker.destroy();
                true
            }
            None => false,
        }
    }

    /// Destroy and evict every breaker.
    pub fn clear(&self) {
        let drained: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| Arc::clone(e.value())).collect();
        self.breakers.clear();
        for breaker in drained {
            breaker.destroy();
        }
    }
}
