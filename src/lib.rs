//! Resilient document-store gateway library

pub mod config;
pub mod gateway;
pub mod observability;
pub mod resilience;
pub mod store;

pub use config::schema::{GatewayConfig, Settings};
pub use gateway::{safe_operation, Gateway, GatewayError, RetryOptions};
pub use resilience::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use store::{DocumentStore, MemoryStore};
