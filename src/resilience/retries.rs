//! Retry logic.
//!
//! # Responsibilities
//! - Re-invoke a failing operation up to `max_attempts` times
//! - Ask the classifier (or a caller override) whether a failure is retryable
//! - Wait an exponentially growing, jittered delay between attempts
//! - Apply the per-attempt deadline when `timeout_ms > 0`
//!
//! # Design Decisions
//! - Attempts are strictly sequential; the next attempt starts only after the
//!   previous failure is classified and its delay has elapsed
//! - `max_attempts = 0` never invokes the operation
//! - Non-retryable failures surface after the first attempt

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::observability::metrics;
use crate::resilience::backoff::Backoff;
use crate::resilience::classifier::{is_retryable, Classify};
use crate::resilience::timeouts::{with_timeout, TimeoutError};

/// Caller override for the retry decision: `(failure, attempt) -> retry?`.
pub type ShouldRetry<E> = Arc<dyn Fn(&E, u32) -> bool + Send + Sync>;

/// Side-effect hook run before each backoff sleep: `(failure, attempt, delay)`.
pub type OnRetry<E> = Arc<dyn Fn(&E, u32, Duration) + Send + Sync>;

/// Retry schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero disables the call entirely.
    pub max_attempts: u32,

    /// Delay after the first failure in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,

    /// Perturb delays by ±25%.
    pub jitter_enabled: bool,

    /// Per-attempt deadline in milliseconds (0 = none).
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_enabled: true,
            timeout_ms: 0,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial_delay_ms: self.initial_delay_ms,
            max_delay_ms: self.max_delay_ms,
            multiplier: self.backoff_multiplier,
            jitter: self.jitter_enabled,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Outcome of a retry loop.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    pub success: bool,
    pub value: Option<T>,
    pub failure: Option<E>,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T, E> RetryResult<T, E> {
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }

    /// Convert into a plain `Result`, building an error with `if_empty` when the
    /// loop ended without capturing a failure (only possible with zero attempts).
    pub fn into_result(self, if_empty: impl FnOnce(u32) -> E) -> Result<T, E> {
        match (self.value, self.failure) {
            (Some(value), _) => Ok(value),
            (None, Some(failure)) => Err(failure),
            (None, None) => Err(if_empty(self.attempts)),
        }
    }
}

/// Per-loop bookkeeping.
struct AttemptContext<E> {
    attempt: u32,
    started_at: Instant,
    last_failure: Option<E>,
}

/// Drives repeated invocation of an operation under a `RetryPolicy`.
pub struct Retrier<E> {
    policy: RetryPolicy,
    label: String,
    logging_enabled: bool,
    should_retry: Option<ShouldRetry<E>>,
    on_retry: Option<OnRetry<E>>,
}

impl<E> Retrier<E> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            label: "operation".to_string(),
            logging_enabled: true,
            should_retry: None,
            on_retry: None,
        }
    }

    /// Name used in logs, metrics and timeout errors.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    pub fn with_should_retry(mut self, should_retry: Option<ShouldRetry<E>>) -> Self {
        self.should_retry = should_retry;
        self
    }

    pub fn with_on_retry(mut self, on_retry: Option<OnRetry<E>>) -> Self {
        self.on_retry = on_retry;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<E> Retrier<E>
where
    E: Classify + From<TimeoutError> + fmt::Display,
{
    /// Run `operation` until it succeeds, a failure is deemed final, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts;
        let deadline = self.policy.timeout();
        let backoff = self.policy.backoff();
        let mut ctx = AttemptContext {
            attempt: 0,
            started_at: Instant::now(),
            last_failure: None,
        };

        while ctx.attempt < max_attempts {
            ctx.attempt += 1;
            let attempt = ctx.attempt;

            let outcome = match deadline {
                Some(timeout) => with_timeout(operation(), timeout, &self.label).await,
                None => operation().await,
            };

            let failure = match outcome {
                Ok(value) => {
                    metrics::record_attempts(&self.label, attempt);
                    return RetryResult {
                        success: true,
                        value: Some(value),
                        failure: None,
                        attempts: attempt,
                        elapsed: ctx.started_at.elapsed(),
                    };
                }
                Err(failure) => failure,
            };

            let retry = match &self.should_retry {
                Some(should_retry) => should_retry(&failure, attempt),
                None => is_retryable(&failure),
            };

            if attempt >= max_attempts || !retry {
                if self.logging_enabled {
                    tracing::warn!(
                        operation = %self.label,
                        attempt,
                        max_attempts,
                        retryable = retry,
                        error = %failure,
                        "Operation failed, giving up"
                    );
                }
                ctx.last_failure = Some(failure);
                break;
            }

            let delay = backoff.delay_for(attempt);
            if let Some(on_retry) = &self.on_retry {
                on_retry(&failure, attempt, delay);
            }
            if self.logging_enabled {
                tracing::warn!(
                    operation = %self.label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "Operation failed, retrying"
                );
            }
            metrics::record_retry(&self.label);

            ctx.last_failure = Some(failure);
            tokio::time::sleep(delay).await;
        }

        metrics::record_attempts(&self.label, ctx.attempt);
        RetryResult {
            success: false,
            value: None,
            failure: ctx.last_failure,
            attempts: ctx.attempt,
            elapsed: ctx.started_at.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Flaky,
        Denied,
        Timeout,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Classify for TestError {
        fn failure_code(&self) -> Option<&str> {
            match self {
                TestError::Flaky => Some("unavailable"),
                TestError::Denied => Some("permission-denied"),
                TestError::Timeout => None,
            }
        }

        fn failure_message(&self) -> Option<Cow<'_, str>> {
            match self {
                TestError::Timeout => Some(Cow::Borrowed("timeout")),
                _ => None,
            }
        }
    }

    impl From<TimeoutError> for TestError {
        fn from(_: TimeoutError) -> Self {
            TestError::Timeout
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter_enabled: false,
            timeout_ms: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_operation_runs_exactly_max_attempts() {
        for n in 1..=5 {
            let calls = AtomicU32::new(0);
            let result: RetryResult<(), TestError> = Retrier::new(fast_policy(n))
                .run(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Flaky) }
                })
                .await;

            assert!(!result.success);
            assert_eq!(result.attempts, n);
            assert_eq!(calls.load(Ordering::SeqCst), n);
            assert_eq!(result.failure, Some(TestError::Flaky));
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_never_invokes() {
        let calls = AtomicU32::new(0);
        let result: RetryResult<(), TestError> = Retrier::new(fast_policy(0))
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(!result.success);
        assert_eq!(result.attempts, 0);
        assert!(result.failure.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.into_result(|_| TestError::Denied), Err(TestError::Denied));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_stops_after_one_attempt() {
        let calls = AtomicU32::new(0);
        let result: RetryResult<(), TestError> = Retrier::new(fast_policy(4))
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Denied) }
            })
            .await;

        assert_eq!(result.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.failure, Some(TestError::Denied));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_without_jitter() {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let seen = delays.clone();

        let started = Instant::now();
        let result: RetryResult<(), TestError> = Retrier::new(fast_policy(3))
            .with_on_retry(Some(Arc::new(move |_: &TestError, _, delay| {
                seen.lock().unwrap().push(delay);
            })))
            .run(|| async { Err(TestError::Flaky) })
            .await;

        assert_eq!(result.attempts, 3);
        assert_eq!(
            *delays.lock().unwrap(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: RetryResult<u32, TestError> = Retrier::new(fast_policy(5))
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(TestError::Flaky)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert!(result.success);
        assert_eq!(result.value, Some(3));
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_override_wins() {
        let calls = AtomicU32::new(0);
        let result: RetryResult<(), TestError> = Retrier::new(fast_policy(3))
            .with_should_retry(Some(Arc::new(|_: &TestError, attempt| attempt < 2)))
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Denied) }
            })
            .await;

        assert_eq!(result.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_attempt_timeout() {
        let mut policy = fast_policy(2);
        policy.timeout_ms = 50;

        let result: RetryResult<(), TestError> = Retrier::new(policy)
            .run(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            })
            .await;

        assert_eq!(result.attempts, 2);
        assert_eq!(result.failure, Some(TestError::Timeout));
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 1000);
        assert_eq!(policy.max_delay_ms, 30_000);
        assert!(policy.jitter_enabled);
        assert_eq!(policy.timeout(), None);
    }
}
