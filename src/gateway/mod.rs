//! Public gateway surface.
//!
//! # Data Flow
//! ```text
//! Caller
//!     → facade.rs (deadline for the operation kind, options over defaults)
//!     → Retrier (resilience::retries)
//!         → CircuitBreaker::execute (when a breaker is named)
//!         → with_timeout
//!         → DocumentStore call
//!     → last failure, unchanged (error.rs)
//!
//! safe.rs: any outcome → SafeResult with a coarse error type
//! subscription.rs: store.subscribe under a supervisor that re-subscribes
//! ```

pub mod error;
pub mod facade;
pub mod options;
pub mod safe;
pub mod subscription;

pub use error::GatewayError;
pub use facade::{BatchOperation, BatchOutcome, Gateway};
pub use options::RetryOptions;
pub use safe::{safe_operation, ErrorType, SafeResult};
pub use subscription::SubscriptionHandle;
