//! Circuit breaker for resource protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: resource assumed down, requests fail fast
//! - Half-Open: trial requests test whether the resource recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures within failure_window >= failure_threshold
//! Open → Half-Open: reset_timeout elapsed (next call or scheduled timer)
//! Half-Open → Closed: success_threshold trial successes
//! Half-Open → Open: any trial failure
//! ```
//!
//! # Design Decisions
//! - One breaker per named resource, owned by the registry
//! - Reacts to failure rate only, never to failure content
//! - State lives behind a mutex that is never held across an await
//! - Listeners run after the lock is released, in registration order
//! - Transitions reach listeners in the order they happened, even when
//!   raised concurrently or from inside a listener

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::resilience::classifier::Classify;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker thresholds and timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures inside the window that open the circuit.
    pub failure_threshold: u32,

    /// Rolling window for counting failures, in milliseconds.
    pub failure_window_ms: u64,

    /// Time spent Open before trial calls are allowed, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Trial successes needed to close from Half-Open.
    pub success_threshold: u32,

    /// Emit log events on transitions and rejections.
    pub logging_enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            reset_timeout_ms: 30_000,
            success_threshold: 2,
            logging_enabled: true,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Per-call overrides merged over registry defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerOverrides {
    pub failure_threshold: Option<u32>,
    pub failure_window_ms: Option<u64>,
    pub reset_timeout_ms: Option<u64>,
    pub success_threshold: Option<u32>,
    pub logging_enabled: Option<bool>,
}

impl CircuitBreakerOverrides {
    pub fn apply(&self, base: &CircuitBreakerConfig) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            failure_window_ms: self.failure_window_ms.unwrap_or(base.failure_window_ms),
            reset_timeout_ms: self.reset_timeout_ms.unwrap_or(base.reset_timeout_ms),
            success_threshold: self.success_threshold.unwrap_or(base.success_threshold),
            logging_enabled: self.logging_enabled.unwrap_or(base.logging_enabled),
        }
    }
}

/// Raised instead of invoking the operation while the circuit is open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{name}' is open; request rejected")]
pub struct CircuitOpenError {
    pub name: String,
    /// Time left until trial calls are allowed.
    pub retry_after: Duration,
}

impl Classify for CircuitOpenError {
    fn failure_message(&self) -> Option<std::borrow::Cow<'_, str>> {
        Some(std::borrow::Cow::Owned(self.to_string()))
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitMetrics {
    pub name: String,
    pub state: CircuitState,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub window_failures: usize,
    pub half_open_successes: u32,
    #[serde(skip)]
    pub last_state_change_at: Instant,
    #[serde(skip)]
    pub next_attempt_at: Option<Instant>,
    pub ms_since_state_change: u64,
    pub ms_until_next_attempt: Option<u64>,
}

/// Observer notified on every transition with the new state.
pub type StateListener = Arc<dyn Fn(CircuitState, &CircuitMetrics) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, StateListener)>,
}

/// Returned by `subscribe`; detaches the listener when `unsubscribe` is called.
#[derive(Debug)]
pub struct ListenerHandle {
    listeners: Weak<Mutex<Listeners>>,
    id: u64,
}

impl ListenerHandle {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).entries.retain(|(id, _)| *id != self.id);
        }
    }
}

struct Core {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_timestamps: VecDeque<Instant>,
    half_open_successes: u32,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    rejected_requests: u64,
    last_state_change_at: Instant,
    reset_timer: Option<JoinHandle<()>>,
    transitions: u64,
}

impl Core {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_timestamps: VecDeque::new(),
            half_open_successes: 0,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            rejected_requests: 0,
            last_state_change_at: Instant::now(),
            reset_timer: None,
            transitions: 0,
        }
    }

    fn next_attempt_at(&self) -> Option<Instant> {
        (self.state == CircuitState::Open)
            .then(|| self.last_state_change_at + self.config.reset_timeout())
    }

    fn trial_due(&self, now: Instant) -> bool {
        self.state == CircuitState::Open
            && now.saturating_duration_since(self.last_state_change_at) >= self.config.reset_timeout()
    }

    fn prune(&mut self, now: Instant) {
        let window = self.config.failure_window();
        while let Some(oldest) = self.failure_timestamps.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.failure_timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.reset_timer.take() {
            timer.abort();
        }
    }

    fn snapshot(&self, name: &str, now: Instant) -> CircuitMetrics {
        let window = self.config.failure_window();
        let next_attempt_at = self.next_attempt_at();
        CircuitMetrics {
            name: name.to_string(),
            state: self.state,
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            rejected_requests: self.rejected_requests,
            window_failures: self
                .failure_timestamps
                .iter()
                .filter(|t| now.saturating_duration_since(**t) < window)
                .count(),
            half_open_successes: self.half_open_successes,
            last_state_change_at: self.last_state_change_at,
            next_attempt_at,
            ms_since_state_change: now.saturating_duration_since(self.last_state_change_at).as_millis() as u64,
            ms_until_next_attempt: next_attempt_at
                .map(|at| at.saturating_duration_since(now).as_millis() as u64),
        }
    }
}

/// A state change computed under the lock, announced after it is released.
struct Transition {
    seq: u64,
    from: CircuitState,
    metrics: CircuitMetrics,
}

/// Transitions waiting to be announced, keyed by sequence number.
#[derive(Default)]
struct Dispatch {
    pending: BTreeMap<u64, Transition>,
    next: u64,
    active: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Circuit breaker guarding one named resource.
pub struct CircuitBreaker {
    name: String,
    core: Mutex<Core>,
    listeners: Arc<Mutex<Listeners>>,
    dispatch: Mutex<Dispatch>,
    this: Weak<CircuitBreaker>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &lock(&self.core).state)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker in the Closed state.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Arc<Self> {
        let name = name.into();
        metrics::record_circuit_state(&name, CircuitState::Closed);
        Arc::new_cyclic(|this| Self {
            name,
            core: Mutex::new(Core::new(config)),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            dispatch: Mutex::new(Dispatch::default()),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        lock(&self.core).config.clone()
    }

    /// Replace thresholds and timings. State, history and counters are kept.
    pub fn reconfigure(&self, config: CircuitBreakerConfig) {
        let mut core = lock(&self.core);
        core.config = config;
        if core.state == CircuitState::Open {
            core.cancel_timer();
            self.schedule_reset(&mut core);
        }
    }

    /// Current state. An Open breaker whose reset timeout has passed reports
    /// Half-Open.
    pub fn state(&self) -> CircuitState {
        let transition = {
            let mut core = lock(&self.core);
            if core.trial_due(Instant::now()) {
                Some(self.transition(&mut core, CircuitState::HalfOpen))
            } else {
                None
            }
        };
        match transition {
            Some(transition) => {
                let state = transition.metrics.state;
                self.notify(transition);
                state
            }
            None => lock(&self.core).state,
        }
    }

    pub fn metrics(&self) -> CircuitMetrics {
        lock(&self.core).snapshot(&self.name, Instant::now())
    }

    /// Run `operation` through the breaker.
    ///
    /// Fails with `CircuitOpenError` (converted into `E`) without invoking the
    /// operation while the circuit is open. The operation's own error is
    /// returned unchanged.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        self.try_acquire().map_err(E::from)?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(error)
            }
        }
    }

    /// Bind `operation` to this breaker, producing a reusable guarded closure.
    pub fn wrap<T, E, F, Fut>(
        self: &Arc<Self>,
        operation: F,
    ) -> impl Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync + 'static
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<CircuitOpenError> + Send + 'static,
    {
        let breaker = Arc::clone(self);
        let operation = Arc::new(operation);
        move || {
            let breaker = Arc::clone(&breaker);
            let operation = Arc::clone(&operation);
            Box::pin(async move { breaker.execute(|| (*operation)()).await })
        }
    }

    /// Register a listener. It is called once right away with the current state.
    pub fn subscribe(
        &self,
        listener: impl Fn(CircuitState, &CircuitMetrics) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let listener: StateListener = Arc::new(listener);
        let id = {
            let mut listeners = lock(&self.listeners);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, listener.clone()));
            id
        };

        let snapshot = self.metrics();
        invoke_listener(&self.name, &listener, snapshot.state, &snapshot);

        ListenerHandle {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    pub fn force_open(&self) {
        self.force(CircuitState::Open);
    }

    pub fn force_close(&self) {
        self.force(CircuitState::Closed);
    }

    /// Return to Closed and zero every counter.
    pub fn reset(&self) {
        let transition = {
            let mut core = lock(&self.core);
            core.total_requests = 0;
            core.successful_requests = 0;
            core.failed_requests = 0;
            core.rejected_requests = 0;
            self.transition(&mut core, CircuitState::Closed)
        };
        self.notify(transition);
    }

    /// Cancel the pending reset timer and drop every listener.
    pub fn destroy(&self) {
        lock(&self.core).cancel_timer();
        lock(&self.listeners).entries.clear();
    }

    fn force(&self, to: CircuitState) {
        let transition = {
            let mut core = lock(&self.core);
            self.transition(&mut core, to)
        };
        self.notify(transition);
    }

    fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let now = Instant::now();
        let (outcome, transition, log) = {
            let mut core = lock(&self.core);
            core.total_requests += 1;

            if core.state != CircuitState::Open {
                (Ok(()), None, false)
            } else if core.trial_due(now) {
                let transition = self.transition(&mut core, CircuitState::HalfOpen);
                (Ok(()), Some(transition), false)
            } else {
                core.rejected_requests += 1;
                let retry_after = core
                    .next_attempt_at()
                    .map(|at| at.saturating_duration_since(now))
                    .unwrap_or_default();
                let error = CircuitOpenError {
                    name: self.name.clone(),
                    retry_after,
                };
                (Err(error), None, core.config.logging_enabled)
            }
        };

        if let Some(transition) = transition {
            self.notify(transition);
        }
        if let Err(error) = &outcome {
            metrics::record_circuit_rejection(&self.name);
            if log {
                tracing::debug!(
                    circuit = %self.name,
                    retry_after_ms = error.retry_after.as_millis() as u64,
                    "Circuit open, request rejected"
                );
            }
        }
        outcome
    }

    fn record_success(&self) {
        let transition = {
            let mut core = lock(&self.core);
            core.successful_requests += 1;
            if core.state == CircuitState::HalfOpen {
                core.half_open_successes += 1;
                if core.half_open_successes >= core.config.success_threshold {
                    Some(self.transition(&mut core, CircuitState::Closed))
                } else {
                    None
                }
            } else {
                None
            }
        };
        if let Some(transition) = transition {
            self.notify(transition);
        }
    }

    fn record_failure(&self) {
        let now = Instant::now();
        let transition = {
            let mut core = lock(&self.core);
            core.failed_requests += 1;
            match core.state {
                CircuitState::Closed => {
                    core.failure_timestamps.push_back(now);
                    core.prune(now);
                    if core.failure_timestamps.len() >= core.config.failure_threshold as usize {
                        Some(self.transition(&mut core, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => Some(self.transition(&mut core, CircuitState::Open)),
                CircuitState::Open => None,
            }
        };
        if let Some(transition) = transition {
            self.notify(transition);
        }
    }

    /// Apply state-entry effects. Caller holds the core lock.
    fn transition(&self, core: &mut Core, to: CircuitState) -> Transition {
        let from = core.state;
        let now = Instant::now();
        core.state = to;
        core.last_state_change_at = now;
        core.half_open_successes = 0;
        core.cancel_timer();

        match to {
            CircuitState::Closed => core.failure_timestamps.clear(),
            CircuitState::Open => self.schedule_reset(core),
            CircuitState::HalfOpen => {}
        }

        metrics::record_circuit_transition(&self.name, to);
        let seq = core.transitions;
        core.transitions += 1;
        Transition {
            seq,
            from,
            metrics: core.snapshot(&self.name, now),
        }
    }

    fn schedule_reset(&self, core: &mut Core) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let breaker = self.this.clone();
        let delay = core
            .next_attempt_at()
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or_default();

        core.reset_timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(breaker) = breaker.upgrade() {
                breaker.on_reset_timer();
            }
        }));
    }

    fn on_reset_timer(&self) {
        let transition = {
            let mut core = lock(&self.core);
            // Detach our own handle so the transition does not abort it.
            core.reset_timer.take();
            if core.trial_due(Instant::now()) {
                Some(self.transition(&mut core, CircuitState::HalfOpen))
            } else {
                None
            }
        };
        if let Some(transition) = transition {
            self.notify(transition);
        }
    }

    /// Queue `transition` and announce every transition that is next in line.
    ///
    /// Only one caller drains at a time. A transition raised while another
    /// caller is draining (another thread, or a listener forcing a state) is
    /// announced by that caller once its turn comes.
    fn notify(&self, transition: Transition) {
        let mut dispatch = lock(&self.dispatch);
        dispatch.pending.insert(transition.seq, transition);
        if dispatch.active {
            return;
        }
        dispatch.active = true;

        loop {
            let next = dispatch.next;
            let Some(transition) = dispatch.pending.remove(&next) else {
                break;
            };
            dispatch.next += 1;
            drop(dispatch);
            self.announce(transition);
            dispatch = lock(&self.dispatch);
        }
        dispatch.active = false;
    }

    fn announce(&self, transition: Transition) {
        let Transition { from, metrics, .. } = transition;
        let to = metrics.state;

        if lock(&self.core).config.logging_enabled {
            if to == CircuitState::Open {
                tracing::warn!(circuit = %self.name, %from, %to, window_failures = metrics.window_failures, "Circuit breaker opened");
            } else {
                tracing::info!(circuit = %self.name, %from, %to, "Circuit breaker state change");
            }
        }

        let listeners: Vec<StateListener> = lock(&self.listeners)
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in &listeners {
            invoke_listener(&self.name, listener, to, &metrics);
        }
    }
}

impl Drop for CircuitBreaker {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(PoisonError::into_inner);
        core.cancel_timer();
    }
}

fn invoke_listener(name: &str, listener: &StateListener, state: CircuitState, metrics: &CircuitMetrics) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(state, metrics))) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(circuit = %name, %state, panic = %reason, "Circuit breaker listener panicked");
    }
}
