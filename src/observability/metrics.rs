//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_operations_total` (counter): facade calls by operation, outcome
//! - `gateway_operation_attempts` (histogram): attempts spent per retry loop
//! - `gateway_retries_total` (counter): backoff sleeps by operation
//! - `gateway_timeouts_total` (counter): expired deadlines by operation
//! - `circuit_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `circuit_breaker_transitions_total` (counter): by breaker, target state
//! - `circuit_breaker_rejections_total` (counter): fast-failed calls by breaker
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is opt-in via configuration

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter on `addr`. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_operation(operation: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        "gateway_operations_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_attempts(operation: &str, attempts: u32) {
    histogram!("gateway_operation_attempts", "operation" => operation.to_string())
        .record(f64::from(attempts));
}

pub fn record_retry(operation: &str) {
    counter!("gateway_retries_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_timeout(operation: &str) {
    counter!("gateway_timeouts_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_circuit_state(name: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("circuit_breaker_state", "name" => name.to_string()).set(value);
}

pub fn record_circuit_transition(name: &str, to: CircuitState) {
    counter!(
        "circuit_breaker_transitions_total",
        "name" => name.to_string(),
        "to" => to.as_str()
    )
    .increment(1);
    record_circuit_state(name, to);
}

pub fn record_circuit_rejection(name: &str) {
    counter!("circuit_breaker_rejections_total", "name" => name.to_string()).increment(1);
}
