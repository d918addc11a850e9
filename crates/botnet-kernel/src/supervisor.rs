//! Shutdown signalling shared by every background loop.

use tokio::sync::watch;
use tracing::info;

/// Owns the node-wide cancellation signal.
pub struct Supervisor {
    /// Send side of the shutdown signal.
    shutdown_tx: watch::Sender<bool>,
    /// Receive side of the shutdown signal (clonable).
    shutdown_rx: watch::Receiver<bool>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            shutdown_tx: tx,
            shutdown_rx: rx,
        }
    }

    /// Get a receiver that will be notified on shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Trigger a graceful shutdown. Idempotent.
    pub fn shutdown(&self) {
        if self.is_shutting_down() {
            return;
        }
        info!("Supervisor: initiating graceful shutdown");
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_shutdown() {
        let sup = Supervisor::new();
        assert!(!sup.is_shutting_down());
        sup.shutdown();
        assert!(sup.is_shutting_down());
        sup.shutdown();
        assert!(sup.is_shutting_down());
    }

    #[tokio::test]
    async fn test_subscriber_sees_shutdown() {
        let sup = Supervisor::new();
        let mut rx = sup.subscribe();
        sup.shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
