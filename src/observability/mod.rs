//! Logging and metrics for the gateway.
//!
//! ```text
//! Retrier ─────────┐
//! CircuitBreaker ──┼─▶ tracing events ─▶ logging.rs (fmt layer, EnvFilter)
//! with_timeout ────┤
//! Gateway ─────────┴─▶ metrics facade ─▶ metrics.rs (Prometheus exporter, optional)
//! ```
//!
//! Events carry `operation`, `circuit` and `attempt` fields. Metrics calls are
//! no-ops until [`metrics::init_metrics`] installs a recorder, so library users
//! who never call it pay nothing beyond the facade.

pub mod logging;
pub mod metrics;
