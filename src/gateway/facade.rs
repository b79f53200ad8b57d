//! Resilient entry points over a `DocumentStore`.
//!
//! # Responsibilities
//! - Pick the deadline for the operation kind (read / write / delete)
//! - Merge caller options over the live default retry policy
//! - Run each attempt through the optional circuit breaker and the deadline
//! - Surface the last failure unchanged once retries are exhausted
//!
//! # Design Decisions
//! - Configuration is swapped atomically; each call works on one snapshot
//! - A named breaker wraps the deadline, so an expired attempt counts as a
//!   breaker failure and a rejected attempt never starts the clock
//! - A batch is one retryable unit; any member failure re-runs all members,
//!   and no member is cancelled because a sibling failed

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use serde_json::Value;

use crate::config::loader::ConfigError;
use crate::config::schema::{GatewayConfig, GatewayConfigPatch, OperationKind, Settings};
use crate::config::validation::validate_gateway;
use crate::gateway::error::GatewayError;
use crate::gateway::options::RetryOptions;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerOverrides};
use crate::resilience::registry::CircuitBreakerRegistry;
use crate::resilience::retries::Retrier;
use crate::resilience::timeouts::with_timeout;
use crate::store::{
    CollectionRef, DocumentRef, DocumentSnapshot, DocumentStore, Query, SetOptions,
};

/// One member of a `resilient_batch` call.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    Get(DocumentRef),
    GetMany(Query),
    Set {
        reference: DocumentRef,
        data: Value,
        options: SetOptions,
    },
    Update {
        reference: DocumentRef,
        partial: Value,
    },
    Delete(DocumentRef),
    Add {
        collection: CollectionRef,
        data: Value,
    },
}

/// Result of one batch member, in request order.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Document(DocumentSnapshot),
    Documents(Vec<DocumentSnapshot>),
    Written,
    Deleted,
    Added(DocumentRef),
}

/// Wraps a document store with retry, deadlines and circuit breaking.
pub struct Gateway<S> {
    store: Arc<S>,
    config: ArcSwap<GatewayConfig>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl<S: DocumentStore> Gateway<S> {
    /// Gateway with default configuration and a private breaker registry.
    pub fn new(store: S) -> Self {
        Self::with_parts(
            Arc::new(store),
            GatewayConfig::default(),
            Arc::new(CircuitBreakerRegistry::default()),
        )
    }

    pub fn with_parts(
        store: Arc<S>,
        config: GatewayConfig,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            store,
            config: ArcSwap::from_pointee(config),
            breakers,
        }
    }

    /// Build from loaded settings; the registry takes the `[circuit_breaker]` defaults.
    pub fn from_settings(store: Arc<S>, settings: &Settings) -> Self {
        Self::with_parts(
            store,
            settings.gateway.clone(),
            Arc::new(CircuitBreakerRegistry::new(settings.circuit_breaker.clone())),
        )
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Read-only snapshot of the live configuration.
    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.load_full()
    }

    /// Merge `patch` into the live configuration.
    ///
    /// The merged result is validated first; on error the live config is untouched.
    pub fn configure(&self, patch: &GatewayConfigPatch) -> Result<Arc<GatewayConfig>, ConfigError> {
        let next = self.config.load().merged(patch);
        validate_gateway(&next).map_err(ConfigError::Validation)?;
        let next = Arc::new(next);
        self.config.store(Arc::clone(&next));
        tracing::info!(
            read_ms = next.timeouts.read_ms,
            write_ms = next.timeouts.write_ms,
            delete_ms = next.timeouts.delete_ms,
            max_attempts = next.default_retry.max_attempts,
            "Gateway configuration updated"
        );
        Ok(next)
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Registry breaker for `name`, created on first use.
    pub fn circuit_breaker(
        &self,
        name: &str,
        overrides: Option<&CircuitBreakerOverrides>,
    ) -> Arc<CircuitBreaker> {
        self.breakers.get(name, overrides)
    }

    pub async fn resilient_get(
        &self,
        reference: &DocumentRef,
        options: &RetryOptions,
    ) -> Result<DocumentSnapshot, GatewayError> {
        let store = &self.store;
        self.run("get", Some(OperationKind::Read), options, move || async move {
            Ok(store.get(reference).await?)
        })
        .await
    }

    pub async fn resilient_get_many(
        &self,
        query: &Query,
        options: &RetryOptions,
    ) -> Result<Vec<DocumentSnapshot>, GatewayError> {
        let store = &self.store;
        self.run("get_many", Some(OperationKind::Read), options, move || async move {
            Ok(store.get_many(query).await?)
        })
        .await
    }

    pub async fn resilient_set(
        &self,
        reference: &DocumentRef,
        data: &Value,
        set_options: SetOptions,
        options: &RetryOptions,
    ) -> Result<(), GatewayError> {
        let store = &self.store;
        self.run("set", Some(OperationKind::Write), options, move || async move {
            Ok(store.set(reference, data.clone(), set_options).await?)
        })
        .await
    }

    pub async fn resilient_update(
        &self,
        reference: &DocumentRef,
        partial: &Value,
        options: &RetryOptions,
    ) -> Result<(), GatewayError> {
        let store = &self.store;
        self.run("update", Some(OperationKind::Write), options, move || async move {
            Ok(store.update(reference, partial.clone()).await?)
        })
        .await
    }

    pub async fn resilient_delete(
        &self,
        reference: &DocumentRef,
        options: &RetryOptions,
    ) -> Result<(), GatewayError> {
        let store = &self.store;
        self.run("delete", Some(OperationKind::Delete), options, move || async move {
            Ok(store.delete(reference).await?)
        })
        .await
    }

    pub async fn resilient_add(
        &self,
        collection: &CollectionRef,
        data: &Value,
        options: &RetryOptions,
    ) -> Result<DocumentRef, GatewayError> {
        let store = &self.store;
        self.run("add", Some(OperationKind::Write), options, move || async move {
            Ok(store.add(collection, data.clone()).await?)
        })
        .await
    }

    /// Run every member concurrently under the write deadline.
    ///
    /// Every member runs to completion before the attempt is judged; the
    /// first failure in request order then fails the attempt. Members that
    /// succeeded on an earlier attempt run again on retry, so non-idempotent
    /// members (`Add`) may be applied more than once.
    pub async fn resilient_batch(
        &self,
        operations: &[BatchOperation],
        options: &RetryOptions,
    ) -> Result<Vec<BatchOutcome>, GatewayError> {
        if operations.is_empty() {
            return Ok(Vec::new());
        }
        self.run("batch", Some(OperationKind::Write), options, move || async move {
            join_all(operations.iter().map(|op| self.apply(op)))
                .await
                .into_iter()
                .collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    /// Run arbitrary work under the default policy. `name` labels logs,
    /// metrics and timeout errors.
    pub async fn resilient_operation<T, F, Fut>(
        &self,
        name: &str,
        options: &RetryOptions,
        operation: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.run(name, None, options, operation).await
    }

    async fn apply(&self, operation: &BatchOperation) -> Result<BatchOutcome, GatewayError> {
        let outcome = match operation {
            BatchOperation::Get(reference) => BatchOutcome::Document(self.store.get(reference).await?),
            BatchOperation::GetMany(query) => BatchOutcome::Documents(self.store.get_many(query).await?),
            BatchOperation::Set {
                reference,
                data,
                options,
            } => {
                self.store.set(reference, data.clone(), *options).await?;
                BatchOutcome::Written
            }
            BatchOperation::Update { reference, partial } => {
                self.store.update(reference, partial.clone()).await?;
                BatchOutcome::Written
            }
            BatchOperation::Delete(reference) => {
                self.store.delete(reference).await?;
                BatchOutcome::Deleted
            }
            BatchOperation::Add { collection, data } => {
                BatchOutcome::Added(self.store.add(collection, data.clone()).await?)
            }
        };
        Ok(outcome)
    }

    async fn run<T, F, Fut>(
        &self,
        label: &str,
        kind: Option<OperationKind>,
        options: &RetryOptions,
        operation: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let config = self.config();
        let default_timeout_ms = match kind {
            Some(kind) => config.timeouts.for_kind(kind),
            None => config.default_retry.timeout_ms,
        };
        let mut policy = options.resolve(&config.default_retry, default_timeout_ms);

        let breaker = options
            .circuit_breaker
            .as_deref()
            .map(|name| self.breakers.get(name, options.circuit_overrides.as_ref()));

        // With a breaker the deadline is applied inside it, per attempt.
        let deadline = policy.timeout();
        if breaker.is_some() {
            policy.timeout_ms = 0;
        }

        let retrier = Retrier::new(policy)
            .label(label)
            .logging(config.logging_enabled)
            .with_should_retry(options.should_retry.clone())
            .with_on_retry(options.on_retry.clone());

        let result = match &breaker {
            Some(breaker) => {
                // The attempt is only built once the breaker admits it.
                let operation = &Mutex::new(operation);
                retrier
                    .run(move || async move {
                        breaker
                            .execute(|| {
                                let mut operation =
                                    operation.lock().unwrap_or_else(PoisonError::into_inner);
                                within_deadline((*operation)(), deadline, label)
                            })
                            .await
                    })
                    .await
            }
            None => retrier.run(operation).await,
        };

        metrics::record_operation(label, result.success);
        result.into_result(|attempts| GatewayError::Exhausted {
            operation: label.to_string(),
            attempts,
        })
    }
}

async fn within_deadline<T, Fut>(
    attempt: Fut,
    deadline: Option<Duration>,
    label: &str,
) -> Result<T, GatewayError>
where
    Fut: Future<Output = Result<T, GatewayError>>,
{
    match deadline {
        Some(timeout) => with_timeout(attempt, timeout, label).await,
        None => attempt.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::resilience::classifier::ErrorCategory;
    use crate::store::{MemoryStore, StoreError, StoreErrorCode};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryOptions {
        RetryOptions::new().initial_delay_ms(10).jitter(false)
    }

    fn gateway() -> (MemoryStore, Gateway<MemoryStore>) {
        let store = MemoryStore::new();
        let gateway = Gateway::new(store.clone());
        (store, gateway)
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_retries_transient_failures() {
        let (store, gateway) = gateway();
        let doc = CollectionRef::new("users").doc("ada");
        store.insert(&doc, json!({"name": "Ada"}));
        store.fail_next(2, StoreError::new(StoreErrorCode::Unavailable, "backend down"));

        let snapshot = gateway.resilient_get(&doc, &quick()).await.unwrap();
        assert_eq!(snapshot.data, Some(json!({"name": "Ada"})));
        assert_eq!(store.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_failure() {
        let (store, gateway) = gateway();
        let doc = CollectionRef::new("users").doc("ada");
        store.fail_next(5, StoreError::new(StoreErrorCode::Internal, "boom"));

        let err = gateway.resilient_get(&doc, &quick()).await.unwrap_err();
        assert_eq!(err, GatewayError::Store(StoreError::new(StoreErrorCode::Internal, "boom")));
        assert_eq!(store.call_count(), 3);
    }

    #[tokio::test]
    async fn test_update_missing_document_is_not_retried() {
        let (store, gateway) = gateway();
        let doc = CollectionRef::new("users").doc("ghost");

        let err = gateway
            .resilient_update(&doc, &json!({"a": 1}), &quick())
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_reports_exhausted() {
        let (store, gateway) = gateway();
        let doc = CollectionRef::new("users").doc("ada");

        let err = gateway
            .resilient_delete(&doc, &RetryOptions::new().max_attempts(0))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Exhausted {
                operation: "delete".into(),
                attempts: 0
            }
        );
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_deadline_comes_from_config() {
        let (store, gateway) = gateway();
        gateway
            .configure(&GatewayConfigPatch {
                timeouts: crate::config::TimeoutsPatch {
                    read_ms: Some(50),
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();
        store.set_latency(Duration::from_millis(200));

        let doc = CollectionRef::new("users").doc("ada");
        let err = gateway
            .resilient_get(&doc, &quick().max_attempts(1))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.category(), ErrorCategory::Timeout);
    }

    #[tokio::test]
    async fn test_configure_rejects_invalid_patch() {
        let (_store, gateway) = gateway();
        let mut retry = gateway.config().default_retry.clone();
        retry.backoff_multiplier = 0.0;

        let result = gateway.configure(&GatewayConfigPatch {
            default_retry: Some(retry),
            ..Default::default()
        });
        assert!(matches!(result, Err(ConfigError::Validation(_))));
        assert_eq!(gateway.config().default_retry.backoff_multiplier, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_guards_every_attempt() {
        let (store, gateway) = gateway();
        let doc = CollectionRef::new("users").doc("ada");
        store.fail_next(10, StoreError::new(StoreErrorCode::Unavailable, "down"));

        let options = quick().max_attempts(5).circuit_breaker("users").circuit_overrides(
            CircuitBreakerOverrides {
                failure_threshold: Some(2),
                ..Default::default()
            },
        );
        let err = gateway.resilient_get(&doc, &options).await.unwrap_err();

        assert!(err.is_circuit_open());
        assert_eq!(store.call_count(), 2);
        let breaker = gateway.circuit_breaker("users", None);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.metrics().rejected_requests, 3);
    }

    #[tokio::test]
    async fn test_open_circuit_never_invokes_operation() {
        let (_store, gateway) = gateway();
        gateway.circuit_breaker("jobs", None).force_open();

        let invoked = AtomicU32::new(0);
        let err = gateway
            .resilient_operation("jobs", &quick().max_attempts(3).circuit_breaker("jobs"), || {
                invoked.fetch_add(1, Ordering::SeqCst);
                async { Ok(1) }
            })
            .await
            .unwrap_err();

        assert!(err.is_circuit_open());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.circuit_breaker("jobs", None).metrics().rejected_requests, 3);
    }

    #[tokio::test]
    async fn test_batch_failure_does_not_cancel_siblings() {
        let (store, gateway) = gateway();
        let users = CollectionRef::new("users");

        let err = gateway
            .resilient_batch(
                &[
                    BatchOperation::Update {
                        reference: users.doc("ghost"),
                        partial: json!({"a": 1}),
                    },
                    BatchOperation::Set {
                        reference: users.doc("bob"),
                        data: json!({"name": "Bob"}),
                        options: SetOptions::default(),
                    },
                ],
                &quick().max_attempts(1),
            )
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert_eq!(store.call_count(), 2);
        let bob = gateway.resilient_get(&users.doc("bob"), &quick()).await.unwrap();
        assert_eq!(bob.data, Some(json!({"name": "Bob"})));
    }

    #[tokio::test]
    async fn test_batch_returns_outcomes_in_order() {
        let (store, gateway) = gateway();
        let users = CollectionRef::new("users");
        store.insert(&users.doc("ada"), json!({"name": "Ada"}));

        let outcomes = gateway
            .resilient_batch(
                &[
                    BatchOperation::Get(users.doc("ada")),
                    BatchOperation::Set {
                        reference: users.doc("bob"),
                        data: json!({"name": "Bob"}),
                        options: SetOptions::default(),
                    },
                    BatchOperation::Delete(users.doc("ada")),
                ],
                &quick(),
            )
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], BatchOutcome::Document(ref s) if s.exists()));
        assert_eq!(outcomes[1], BatchOutcome::Written);
        assert_eq!(outcomes[2], BatchOutcome::Deleted);
    }
}
