//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to the document store:
//!     → retries.rs (attempt loop, backoff.rs schedules the delays)
//!     → circuit_breaker.rs (optional guard, fails fast when the resource is down)
//!     → timeouts.rs (enforce the per-attempt deadline)
//!     → On failure: classifier.rs (retryable? which category?)
//! ```
//!
//! # Design Decisions
//! - Every primitive is usable on its own; the gateway composes them
//! - Unknown failures are retried, known-permanent ones are not
//! - Breakers live in a registry keyed by resource name

pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerOverrides, CircuitMetrics,
    CircuitOpenError, CircuitState, ListenerHandle,
};
pub use classifier::{classify, is_retryable, Classification, Classify, ErrorCategory};
pub use registry::CircuitBreakerRegistry;
pub use retries::{OnRetry, Retrier, RetryPolicy, RetryResult, ShouldRetry};
pub use timeouts::{with_deadline, with_timeout, TimeoutError};
