//! Non-failing wrapper that turns any outcome into a classified result.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde::Serialize;

use crate::resilience::classifier::{classify, Classify, ErrorCategory};

/// Coarse failure kind reported by `safe_operation`, suitable for UI branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorType {
    Network,
    RateLimit,
    Auth,
    Timeout,
    Transient,
    Permanent,
    Unknown,
}

impl From<ErrorCategory> for ErrorType {
    fn from(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Network => ErrorType::Network,
            ErrorCategory::RateLimit => ErrorType::RateLimit,
            ErrorCategory::Auth => ErrorType::Auth,
            ErrorCategory::Timeout => ErrorType::Timeout,
            ErrorCategory::TransientServer => ErrorType::Transient,
            ErrorCategory::Permanent => ErrorType::Permanent,
            ErrorCategory::Unknown => ErrorType::Unknown,
        }
    }
}

/// Outcome of `safe_operation`.
///
/// On failure `value` holds the fallback (if one was given) and `error_type`
/// is always set. `failure` is `None` only when the operation panicked.
#[derive(Debug, Clone, PartialEq)]
pub struct SafeResult<T, E> {
    pub success: bool,
    pub value: Option<T>,
    pub failure: Option<E>,
    pub error_type: Option<ErrorType>,
}

impl<T, E> SafeResult<T, E> {
    fn failed(failure: Option<E>, error_type: ErrorType, fallback: Option<T>) -> Self {
        Self {
            success: false,
            value: fallback,
            failure,
            error_type: Some(error_type),
        }
    }
}

/// Await `operation` and classify its failure instead of returning it.
///
/// Never fails and never propagates a panic from `operation`.
pub async fn safe_operation<T, E, Fut>(operation: Fut, fallback: Option<T>) -> SafeResult<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: Classify,
{
    match AssertUnwindSafe(operation).catch_unwind().await {
        Ok(Ok(value)) => SafeResult {
            success: true,
            value: Some(value),
            failure: None,
            error_type: None,
        },
        Ok(Err(failure)) => {
            let error_type = ErrorType::from(classify(&failure).category);
            SafeResult::failed(Some(failure), error_type, fallback)
        }
        Err(panic) => {
            tracing::error!(panic = %panic_reason(panic.as_ref()), "Operation panicked");
            SafeResult::failed(None, ErrorType::Unknown, fallback)
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StoreError, StoreErrorCode};

    #[tokio::test]
    async fn test_success_has_no_error_type() {
        let result = safe_operation(async { Ok::<_, StoreError>(7) }, Some(0)).await;
        assert!(result.success);
        assert_eq!(result.value, Some(7));
        assert_eq!(result.error_type, None);
    }

    #[tokio::test]
    async fn test_failure_is_classified_and_falls_back() {
        let cases = [
            (StoreError::new(StoreErrorCode::Unavailable, ""), ErrorType::Network),
            (StoreError::new(StoreErrorCode::ResourceExhausted, ""), ErrorType::RateLimit),
            (StoreError::new(StoreErrorCode::Unauthenticated, ""), ErrorType::Auth),
            (StoreError::from_message("request timeout"), ErrorType::Timeout),
            (StoreError::new(StoreErrorCode::Aborted, ""), ErrorType::Transient),
            (StoreError::new(StoreErrorCode::AlreadyExists, ""), ErrorType::Permanent),
            (StoreError::opaque(), ErrorType::Unknown),
        ];

        for (error, expected) in cases {
            let result = safe_operation(async move { Err::<u32, _>(error) }, Some(42)).await;
            assert!(!result.success);
            assert_eq!(result.value, Some(42));
            assert!(result.failure.is_some());
            assert_eq!(result.error_type, Some(expected));
        }
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let result: SafeResult<u32, StoreError> = safe_operation(
            async {
                if true {
                    panic!("bad state");
                }
                Ok(1)
            },
            None,
        )
        .await;

        assert!(!result.success);
        assert_eq!(result.value, None);
        assert_eq!(result.failure, None);
        assert_eq!(result.error_type, Some(ErrorType::Unknown));
    }
}
