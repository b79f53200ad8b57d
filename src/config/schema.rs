//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::retries::RetryPolicy;

/// Root configuration loaded from disk.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Retry policy, timeouts and logging for gateway calls.
    pub gateway: GatewayConfig,

    /// Defaults for breakers created by the registry.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Kind of store operation, used to pick a default timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Read,
    Write,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::Delete => "delete",
        }
    }
}

/// Process-wide gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Retry policy applied when callers pass no overrides.
    pub default_retry: RetryPolicy,

    /// Per-attempt deadline per operation kind.
    pub timeouts: OperationTimeouts,

    /// Emit log events for retries, exhaustion and timeouts.
    pub logging_enabled: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_retry: RetryPolicy::default(),
            timeouts: OperationTimeouts::default(),
            logging_enabled: true,
        }
    }
}

impl GatewayConfig {
    /// Merge `patch` over this config, returning the result.
    pub fn merged(&self, patch: &GatewayConfigPatch) -> GatewayConfig {
        let mut next = self.clone();
        if let Some(retry) = &patch.default_retry {
            next.default_retry = retry.clone();
        }
        if let Some(ms) = patch.timeouts.read_ms {
            next.timeouts.read_ms = ms;
        }
        if let Some(ms) = patch.timeouts.write_ms {
            next.timeouts.write_ms = ms;
        }
        if let Some(ms) = patch.timeouts.delete_ms {
            next.timeouts.delete_ms = ms;
        }
        if let Some(enabled) = patch.logging_enabled {
            next.logging_enabled = enabled;
        }
        next
    }
}

/// Per-attempt deadlines in milliseconds (0 = none).
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct OperationTimeouts {
    pub read_ms: u64,
    pub write_ms: u64,
    pub delete_ms: u64,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            read_ms: 10_000,
            write_ms: 15_000,
            delete_ms: 10_000,
        }
    }
}

impl OperationTimeouts {
    pub fn for_kind(&self, kind: OperationKind) -> u64 {
        match kind {
            OperationKind::Read => self.read_ms,
            OperationKind::Write => self.write_ms,
            OperationKind::Delete => self.delete_ms,
        }
    }

    pub fn duration_for(&self, kind: OperationKind) -> Option<Duration> {
        let ms = self.for_kind(kind);
        (ms > 0).then(|| Duration::from_millis(ms))
    }
}

/// Partial update for `GatewayConfig`; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfigPatch {
    pub default_retry: Option<RetryPolicy>,
    pub timeouts: TimeoutsPatch,
    pub logging_enabled: Option<bool>,
}

/// Partial update for `OperationTimeouts`.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutsPatch {
    pub read_ms: Option<u64>,
    pub write_ms: Option<u64>,
    pub delete_ms: Option<u64>,
}

impl From<GatewayConfig> for GatewayConfigPatch {
    fn from(config: GatewayConfig) -> Self {
        Self {
            default_retry: Some(config.default_retry),
            timeouts: TimeoutsPatch {
                read_ms: Some(config.timeouts.read_ms),
                write_ms: Some(config.timeouts.write_ms),
                delete_ms: Some(config.timeouts.delete_ms),
            },
            logging_enabled: Some(config.logging_enabled),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.gateway.timeouts.for_kind(OperationKind::Read), 10_000);
        assert_eq!(settings.gateway.timeouts.for_kind(OperationKind::Write), 15_000);
        assert!(settings.gateway.logging_enabled);
        assert_eq!(settings.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [gateway.timeouts]
            read_ms = 50

            [gateway.default_retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(settings.gateway.timeouts.read_ms, 50);
        assert_eq!(settings.gateway.timeouts.write_ms, 15_000);
        assert_eq!(settings.gateway.default_retry.max_attempts, 5);
        assert_eq!(settings.gateway.default_retry.initial_delay_ms, 1000);
    }

    #[test]
    fn test_patch_merges_only_present_fields() {
        let base = GatewayConfig::default();
        let patch = GatewayConfigPatch {
            timeouts: TimeoutsPatch {
                read_ms: Some(50),
                ..Default::default()
            },
            logging_enabled: Some(false),
            ..Default::default()
        };

        let merged = base.merged(&patch);
        assert_eq!(merged.timeouts.read_ms, 50);
        assert_eq!(merged.timeouts.write_ms, base.timeouts.write_ms);
        assert!(!merged.logging_enabled);
        assert_eq!(merged.default_retry, base.default_retry);
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let timeouts = OperationTimeouts {
            read_ms: 0,
            ..Default::default()
        };
        assert_eq!(timeouts.duration_for(OperationKind::Read), None);
        assert_eq!(
            timeouts.duration_for(OperationKind::Delete),
            Some(Duration::from_millis(10_000))
        );
    }
}
