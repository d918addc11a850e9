//! Periodic background loops: discovery, neighbor health, cache sweeps and
//! agent presence.
//!
//! Every loop selects on the supervisor's shutdown signal between ticks, so
//! no new tick starts once shutdown is requested. A tick already running is
//! allowed to finish; its network calls carry their own timeouts.

use dashmap::DashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Running loop handles, keyed by loop name.
pub struct BackgroundTasks {
    tasks: DashMap<&'static str, JoinHandle<()>>,
    /// Shutdown signal receiver (from Supervisor).
    shutdown_rx: watch::Receiver<bool>,
}

impl BackgroundTasks {
    /// Create a task set bound to the supervisor's shutdown signal.
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            tasks: DashMap::new(),
            shutdown_rx,
        }
    }

    /// Run `tick` every `interval` until shutdown. With `run_immediately` the
    /// first tick fires right away instead of after one interval.
    ///
    /// Starting a loop under a name that is already running replaces (and
    /// aborts) the old one.
    pub fn spawn_periodic<F, Fut>(
        &self,
        name: &'static str,
        interval: Duration,
        run_immediately: bool,
        tick: F,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if interval.is_zero() {
            warn!(task = name, "Background loop has a zero interval, not starting");
            return;
        }
        let mut shutdown = self.shutdown_rx.clone();
        info!(task = name, interval_secs = interval.as_secs(), "Starting background loop");

        let handle = tokio::spawn(async move {
            if run_immediately && !*shutdown.borrow() {
                tick().await;
            }
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => {
                        info!(task = name, "Background loop: shutdown signal received");
                        break;
                    }
                }
                if *shutdown.borrow() {
                    break;
                }
                tick().await;
            }
            debug!(task = name, "Background loop stopped");
        });

        if let Some(old) = self.tasks.insert(name, handle) {
            old.abort();
        }
    }

    /// Names of the loops currently registered.
    pub fn running(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.tasks.iter().map(|e| *e.key()).collect();
        names.sort_unstable();
        names
    }

    /// Wait for every loop to exit. Call after the shutdown signal fired.
    pub async fn join_all(&self) {
        let names: Vec<&'static str> = self.tasks.iter().map(|e| *e.key()).collect();
        for name in names {
            if let Some((_, handle)) = self.tasks.remove(name) {
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        warn!(task = name, error = %e, "Background loop ended abnormally");
                    }
                }
            }
        }
    }
}
