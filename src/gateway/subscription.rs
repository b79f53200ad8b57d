//! Self-healing change subscriptions.
//!
//! # Data Flow
//! ```text
//! resilient_subscribe
//!     → spawn supervisor task
//!     → store.subscribe(target) ── changes ──→ on_change
//!         └─ stream error → classify
//!              ├─ retryable, budget left → backoff sleep → subscribe again
//!              └─ otherwise → on_error, task ends
//! ```
//!
//! # Design Decisions
//! - The attempt budget counts consecutive failures. It refills only when a
//!   change arrives after the initial snapshot, so a stream that opens and
//!   drops again keeps backing off
//! - Dropping the handle cancels the task and detaches the live listener

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::gateway::error::GatewayError;
use crate::gateway::facade::Gateway;
use crate::gateway::options::RetryOptions;
use crate::observability::metrics;
use crate::resilience::classifier::is_retryable;
use crate::store::{
    ChangeCallback, ChangeSet, DocumentStore, ErrorCallback, SnapshotMeta, StoreError,
    SubscriptionTarget,
};

/// Keeps a resilient subscription alive. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SubscriptionHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// False once the subscription gave up or was cancelled.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl<S: DocumentStore> Gateway<S> {
    /// Subscribe to `target`, re-subscribing with backoff after retryable
    /// stream errors. Must be called inside a Tokio runtime.
    ///
    /// `on_error` fires at most once: for a non-retryable error, or for the
    /// last error once `max_attempts` consecutive failures have been seen.
    pub fn resilient_subscribe(
        &self,
        target: SubscriptionTarget,
        on_change: impl Fn(ChangeSet, SnapshotMeta) + Send + Sync + 'static,
        on_error: impl Fn(GatewayError) + Send + Sync + 'static,
        options: &RetryOptions,
    ) -> SubscriptionHandle {
        let config = self.config();
        let policy = options.resolve(&config.default_retry, 0);
        let should_retry = options.should_retry.clone();
        let on_retry = options.on_retry.clone();
        let logging = config.logging_enabled;
        let store = Arc::clone(self.store());
        let on_change: ChangeCallback = Arc::new(on_change);
        let label = format!("subscribe:{}", target);

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let backoff = policy.backoff();
            let mut failures = 0u32;

            loop {
                let (error_tx, mut error_rx) = mpsc::unbounded_channel::<StoreError>();
                let deliveries = Arc::new(AtomicU32::new(0));

                let forward: ChangeCallback = {
                    let on_change = Arc::clone(&on_change);
                    let deliveries = Arc::clone(&deliveries);
                    Arc::new(move |change, meta| {
                        deliveries.fetch_add(1, Ordering::SeqCst);
                        on_change(change, meta);
                    })
                };
                let report: ErrorCallback = Arc::new(move |error| {
                    let _ = error_tx.send(error);
                });

                let registration = store.subscribe(&target, forward, report);

                let error = tokio::select! {
                    _ = &mut cancel_rx => {
                        registration.unsubscribe();
                        return;
                    }
                    Some(error) = error_rx.recv() => error,
                };
                registration.unsubscribe();

                // The first delivery is the snapshot every new stream sends.
                if deliveries.load(Ordering::SeqCst) > 1 {
                    failures = 0;
                }
                failures += 1;

                let failure = GatewayError::from(error);
                let retry = match &should_retry {
                    Some(should_retry) => should_retry(&failure, failures),
                    None => is_retryable(&failure),
                };

                if !retry || failures >= policy.max_attempts {
                    if logging {
                        tracing::warn!(
                            subscription = %label,
                            attempt = failures,
                            retryable = retry,
                            error = %failure,
                            "Subscription failed, giving up"
                        );
                    }
                    on_error(failure);
                    return;
                }

                let delay = backoff.delay_for(failures);
                if let Some(on_retry) = &on_retry {
                    on_retry(&failure, failures, delay);
                }
                if logging {
                    tracing::warn!(
                        subscription = %label,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "Subscription dropped, re-subscribing"
                    );
                }
                metrics::record_retry(&label);

                tokio::select! {
                    _ = &mut cancel_rx => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        });

        SubscriptionHandle {
            cancel: Some(cancel_tx),
            task,
        }
    }
}
