//! Shared utilities for integration tests.

use std::path::PathBuf;
use std::sync::Arc;

use resilient_gateway::config::GatewayConfig;
use resilient_gateway::gateway::{Gateway, RetryOptions};
use resilient_gateway::resilience::CircuitBreakerRegistry;
use resilient_gateway::store::{MemoryStore, StoreError, StoreErrorCode};

/// Gateway over a fresh in-memory store and a private breaker registry.
pub fn gateway_with(config: GatewayConfig) -> (MemoryStore, Gateway<MemoryStore>) {
    let store = MemoryStore::new();
    let gateway = Gateway::with_parts(
        Arc::new(store.clone()),
        config,
        Arc::new(CircuitBreakerRegistry::default()),
    );
    (store, gateway)
}

/// Short, deterministic delays: 10ms, 20ms, 40ms...
#[allow(dead_code)]
pub fn fast_options() -> RetryOptions {
    RetryOptions::new().initial_delay_ms(10).jitter(false)
}

#[allow(dead_code)]
pub fn unavailable() -> StoreError {
    StoreError::new(StoreErrorCode::Unavailable, "backend unreachable")
}

/// Write `content` to a unique file under the system temp dir.
#[allow(dead_code)]
pub fn write_temp_config(content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("gateway-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(&path, content).unwrap();
    path
}
