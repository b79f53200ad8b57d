//! End-to-end behaviour of the gateway over the in-memory store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use resilient_gateway::config::{GatewayConfig, OperationTimeouts};
use resilient_gateway::gateway::{
    safe_operation, BatchOperation, ErrorType, Gateway, GatewayError, RetryOptions,
};
use resilient_gateway::resilience::{
    CircuitBreakerOverrides, CircuitBreakerRegistry, CircuitState, ErrorCategory,
};
use resilient_gateway::store::{
    CollectionRef, MemoryStore, Query, SetOptions, StoreError, StoreErrorCode,
};

mod common;

#[tokio::test(start_paused = true)]
async fn test_slow_read_fails_with_timeout() {
    let config = GatewayConfig {
        timeouts: OperationTimeouts {
            read_ms: 50,
            ..Default::default()
        },
        ..Default::default()
    };
    let (store, gateway) = common::gateway_with(config);
    let doc = CollectionRef::new("budgets").doc("march");
    store.insert(&doc, json!({"limit": 500}));
    store.set_latency(Duration::from_millis(200));

    let err = gateway
        .resilient_get(&doc, &RetryOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Timeout(ref t) if t.timeout == Duration::from_millis(50)));
    assert_eq!(err.category(), ErrorCategory::Timeout);
    assert_eq!(store.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_surfaces_unchanged() {
    let (store, gateway) = common::gateway_with(GatewayConfig::default());
    let denied = StoreError::new(StoreErrorCode::PermissionDenied, "rules rejected write");
    store.fail_next(3, denied.clone());

    let err = gateway
        .resilient_set(
            &CollectionRef::new("budgets").doc("march"),
            &json!({"limit": 1}),
            SetOptions::default(),
            &common::fast_options(),
        )
        .await
        .unwrap_err();

    assert_eq!(err, GatewayError::Store(denied));
    assert_eq!(err.category(), ErrorCategory::Auth);
    assert_eq!(store.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resilient_operation_wraps_arbitrary_work() {
    let (_store, gateway) = common::gateway_with(GatewayConfig::default());
    let calls = AtomicU32::new(0);
    let delays = Arc::new(Mutex::new(Vec::new()));
    let seen = delays.clone();

    let options = common::fast_options().on_retry(move |_, _, delay| seen.lock().unwrap().push(delay));
    let value = gateway
        .resilient_operation("recalculate", &options, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(GatewayError::from(common::unavailable()))
                } else {
                    Ok(n * 10)
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 30);
    assert_eq!(
        *delays.lock().unwrap(),
        vec![Duration::from_millis(10), Duration::from_millis(20)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_batch_recovers_from_transient_failure() {
    let (store, gateway) = common::gateway_with(GatewayConfig::default());
    let budgets = CollectionRef::new("budgets");
    store.fail_next(1, common::unavailable());

    let outcomes = gateway
        .resilient_batch(
            &[
                BatchOperation::Set {
                    reference: budgets.doc("march"),
                    data: json!({"limit": 500}),
                    options: SetOptions::default(),
                },
                BatchOperation::Set {
                    reference: budgets.doc("april"),
                    data: json!({"limit": 650}),
                    options: SetOptions::default(),
                },
            ],
            &common::fast_options(),
        )
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    let docs = gateway
        .resilient_get_many(&Query::new(budgets), &common::fast_options())
        .await
        .unwrap();
    assert_eq!(docs.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_batch_retry_reruns_members_that_succeeded() {
    let (store, gateway) = common::gateway_with(GatewayConfig::default());
    let todos = CollectionRef::new("todos");

    // Force one retry of an otherwise permanent failure.
    let options = common::fast_options().should_retry(|_, attempt| attempt < 2);
    let err = gateway
        .resilient_batch(
            &[
                BatchOperation::Add {
                    collection: todos.clone(),
                    data: json!({"title": "pay rent"}),
                },
                BatchOperation::Update {
                    reference: CollectionRef::new("notes").doc("missing"),
                    partial: json!({"x": 1}),
                },
            ],
            &options,
        )
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Permanent);
    assert_eq!(store.call_count(), 4);
    let added = gateway
        .resilient_get_many(&Query::new(todos), &common::fast_options())
        .await
        .unwrap();
    assert_eq!(added.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_safe_operation_classifies_gateway_failure() {
    let (store, gateway) = common::gateway_with(GatewayConfig::default());
    store.fail_next(
        10,
        StoreError::new(StoreErrorCode::ResourceExhausted, "quota exceeded"),
    );
    let doc = CollectionRef::new("budgets").doc("march");

    let result = safe_operation(
        gateway.resilient_get(&doc, &common::fast_options().max_attempts(2)),
        None,
    )
    .await;

    assert!(!result.success);
    assert!(result.value.is_none());
    assert_eq!(result.error_type, Some(ErrorType::RateLimit));
    assert_eq!(store.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_shared_between_gateways() {
    let registry = Arc::new(CircuitBreakerRegistry::default());
    let primary_store = MemoryStore::new();
    let replica_store = MemoryStore::new();
    let primary = Gateway::with_parts(
        Arc::new(primary_store.clone()),
        GatewayConfig::default(),
        Arc::clone(&registry),
    );
    let replica = Gateway::with_parts(
        Arc::new(replica_store.clone()),
        GatewayConfig::default(),
        Arc::clone(&registry),
    );

    let options = common::fast_options()
        .max_attempts(1)
        .circuit_breaker("budgets")
        .circuit_overrides(CircuitBreakerOverrides {
            failure_threshold: Some(2),
            ..Default::default()
        });
    let doc = CollectionRef::new("budgets").doc("march");
    primary_store.fail_next(2, common::unavailable());

    primary.resilient_get(&doc, &options).await.unwrap_err();
    primary.resilient_get(&doc, &options).await.unwrap_err();

    let err = replica.resilient_get(&doc, &options).await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(replica_store.call_count(), 0);
    assert_eq!(registry.names(), vec!["budgets".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_after_reset_timeout() {
    let (store, gateway) = common::gateway_with(GatewayConfig::default());
    let breaker = gateway.circuit_breaker(
        "budgets",
        Some(&CircuitBreakerOverrides {
            failure_threshold: Some(2),
            reset_timeout_ms: Some(1_000),
            success_threshold: Some(2),
            ..Default::default()
        }),
    );
    let states = Arc::new(Mutex::new(Vec::new()));
    let log = states.clone();
    let _listener = breaker.subscribe(move |state, _| log.lock().unwrap().push(state));

    let options = common::fast_options().max_attempts(1).circuit_breaker("budgets");
    let doc = CollectionRef::new("budgets").doc("march");
    store.insert(&doc, json!({"limit": 500}));
    store.fail_next(2, common::unavailable());

    gateway.resilient_get(&doc, &options).await.unwrap_err();
    gateway.resilient_get(&doc, &options).await.unwrap_err();
    assert!(gateway.resilient_get(&doc, &options).await.unwrap_err().is_circuit_open());
    assert_eq!(store.call_count(), 2);

    tokio::time::advance(Duration::from_millis(1_000)).await;
    gateway.resilient_get(&doc, &options).await.unwrap();
    gateway.resilient_get(&doc, &options).await.unwrap();

    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            CircuitState::Closed,
            CircuitState::Open,
            CircuitState::HalfOpen,
            CircuitState::Closed,
        ]
    );
    let metrics = breaker.metrics();
    assert_eq!(metrics.rejected_requests, 1);
    assert_eq!(metrics.failed_requests, 2);
    assert_eq!(metrics.successful_requests, 2);
}
