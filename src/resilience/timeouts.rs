//! Timeout enforcement.
//!
//! # Responsibilities
//! - Race an operation against a deadline
//! - Produce a distinguishable failure when the deadline wins
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - The losing future is dropped; work already handed to a remote backend is
//!   not recalled

use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::resilience::classifier::Classify;

/// Raised when an operation does not finish before its deadline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("operation '{operation}' timeout after {}ms", .timeout.as_millis())]
pub struct TimeoutError {
    pub operation: String,
    pub timeout: Duration,
}

impl TimeoutError {
    pub fn new(operation: impl Into<String>, timeout: Duration) -> Self {
        Self {
            operation: operation.into(),
            timeout,
        }
    }
}

impl Classify for TimeoutError {
    fn failure_message(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Owned(self.to_string()))
    }

    fn is_timeout(&self) -> bool {
        true
    }
}

/// Race `operation` against `timeout`; on expiry return `on_timeout()` instead.
pub async fn with_deadline<F, T, E>(
    operation: F,
    timeout: Duration,
    on_timeout: impl FnOnce() -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

/// Race `operation` against `timeout`, failing with a `TimeoutError`.
pub async fn with_timeout<F, T, E>(operation: F, timeout: Duration, label: &str) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<TimeoutError>,
{
    with_deadline(operation, timeout, || {
        tracing::debug!(operation = %label, timeout_ms = timeout.as_millis() as u64, "Deadline elapsed");
        crate::observability::metrics::record_timeout(label);
        E::from(TimeoutError::new(label, timeout))
    })
    .await
}
