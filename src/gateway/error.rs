//! Gateway error type.

use std::borrow::Cow;

use thiserror::Error;

use crate::resilience::circuit_breaker::CircuitOpenError;
use crate::resilience::classifier::{classify, Classification, Classify, ErrorCategory};
use crate::resilience::timeouts::TimeoutError;
use crate::store::StoreError;

/// Failure surfaced by gateway calls.
///
/// The store's own failure is passed through unchanged so callers can still
/// match on its code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The retry loop ended without capturing any failure.
    #[error("operation '{operation}' failed after {attempts} attempts")]
    Exhausted { operation: String, attempts: u32 },
}

impl GatewayError {
    pub fn classification(&self) -> Classification {
        classify(self)
    }

    pub fn category(&self) -> ErrorCategory {
        self.classification().category
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GatewayError::CircuitOpen(_))
    }
}

impl Classify for GatewayError {
    fn failure_code(&self) -> Option<&str> {
        match self {
            GatewayError::Store(e) => e.failure_code(),
            _ => None,
        }
    }

    fn failure_message(&self) -> Option<Cow<'_, str>> {
        match self {
            GatewayError::Store(e) => e.failure_message(),
            GatewayError::Timeout(e) => e.failure_message(),
            GatewayError::CircuitOpen(e) => e.failure_message(),
            GatewayError::Exhausted { .. } => Some(Cow::Owned(self.to_string())),
        }
    }

    fn is_timeout(&self) -> bool {
        GatewayError::is_timeout(self)
    }
}
