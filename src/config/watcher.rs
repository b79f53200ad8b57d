//! Settings file watcher for hot reload.
//!
//! ```text
//! notify event ─▶ event channel ─▶ debounce ─▶ load_settings ─▶ compare with last applied
//!                                                   │                 │
//!                                             invalid: log      unchanged: drop
//!                                                                changed:   send
//! ```
//!
//! Editors often write a file in several steps, so events are coalesced until
//! the file has been quiet for the debounce interval. Only the `[gateway]`
//! section is applied at runtime; edits to other sections are logged and
//! otherwise wait for a restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_settings;
use crate::config::schema::Settings;

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Streams each valid, changed version of the settings file.
pub struct ConfigWatcher {
    path: PathBuf,
    current: Settings,
    debounce: Duration,
    update_tx: mpsc::UnboundedSender<Settings>,
}

impl ConfigWatcher {
    /// `current` is the settings already in effect; reloads equal to it are dropped.
    pub fn new(path: &Path, current: Settings) -> (Self, mpsc::UnboundedReceiver<Settings>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                current,
                debounce: DEFAULT_DEBOUNCE,
                update_tx,
            },
            update_rx,
        )
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Must be called inside a Tokio runtime.
    ///
    /// Keep the returned watcher alive for as long as updates are wanted;
    /// dropping it ends the reload task.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let (event_tx, event_rx) = mpsc::unbounded_channel::<()>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let _ = event_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Settings watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, debounce_ms = self.debounce.as_millis() as u64, "Settings watcher started");
        tokio::spawn(self.reload_loop(event_rx));
        Ok(watcher)
    }

    async fn reload_loop(mut self, mut events: mpsc::UnboundedReceiver<()>) {
        while next_burst(&mut events, self.debounce).await {
            let next = match load_settings(&self.path) {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(path = ?self.path, error = %e, "Rejected settings file, keeping current configuration");
                    continue;
                }
            };
            if let Some(next) = self.accept(next) {
                if self.update_tx.send(next).is_err() {
                    break;
                }
            }
        }
        tracing::debug!(path = ?self.path, "Settings watcher stopped");
    }

    /// Record `next` as current and return it, or `None` when nothing changed.
    fn accept(&mut self, next: Settings) -> Option<Settings> {
        if next == self.current {
            tracing::debug!(path = ?self.path, "Settings file touched but unchanged");
            return None;
        }

        let restart_only = restart_only_sections(&self.current, &next);
        if !restart_only.is_empty() {
            tracing::warn!(sections = ?restart_only, "Changed settings sections take effect after restart");
        }
        if next.gateway != self.current.gateway {
            tracing::info!(path = ?self.path, "Gateway settings changed, reloading");
        }

        self.current = next.clone();
        Some(next)
    }
}

/// Wait for one event, then until no event arrives for `debounce`.
/// False once the event source is gone.
async fn next_burst(events: &mut mpsc::UnboundedReceiver<()>, debounce: Duration) -> bool {
    if events.recv().await.is_none() {
        return false;
    }
    loop {
        match tokio::time::timeout(debounce, events.recv()).await {
            Ok(Some(())) => continue,
            Ok(None) | Err(_) => return true,
        }
    }
}

fn restart_only_sections(current: &Settings, next: &Settings) -> Vec<&'static str> {
    let mut sections = Vec::new();
    if current.circuit_breaker != next.circuit_breaker {
        sections.push("circuit_breaker");
    }
    if current.observability != next.observability {
        sections.push("observability");
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher(current: Settings) -> ConfigWatcher {
        ConfigWatcher::new(Path::new("gateway.toml"), current).0
    }

    #[test]
    fn test_unchanged_settings_are_dropped() {
        let mut watcher = watcher(Settings::default());
        assert!(watcher.accept(Settings::default()).is_none());
    }

    #[test]
    fn test_changed_settings_become_current() {
        let mut watcher = watcher(Settings::default());
        let mut next = Settings::default();
        next.gateway.timeouts.read_ms = 1_000;

        assert_eq!(watcher.accept(next.clone()), Some(next.clone()));
        assert!(watcher.accept(next).is_none());
    }

    #[test]
    fn test_restart_only_sections() {
        let current = Settings::default();
        let mut next = current.clone();
        next.gateway.logging_enabled = !next.gateway.logging_enabled;
        assert!(restart_only_sections(&current, &next).is_empty());

        next.circuit_breaker.failure_threshold += 1;
        next.observability.log_level = "trace".into();
        assert_eq!(
            restart_only_sections(&current, &next),
            vec!["circuit_breaker", "observability"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_events_coalesces() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for _ in 0..5 {
            tx.send(()).unwrap();
        }

        let started = tokio::time::Instant::now();
        assert!(next_burst(&mut rx, Duration::from_millis(250)).await);
        assert_eq!(started.elapsed(), Duration::from_millis(250));
        assert!(rx.try_recv().is_err());

        drop(tx);
        assert!(!next_burst(&mut rx, Duration::from_millis(250)).await);
    }
}
