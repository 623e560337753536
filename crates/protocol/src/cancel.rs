//! Cooperative cancellation for connection and discovery loops
//!
//! Every long-running loop observes one shared [`CancelToken`] at each
//! iteration boundary; requesting cancellation is the single exit
//! trigger for all loops of a connection. Built on a `tokio::sync::watch`
//! channel so any number of clones can wait on the same signal.

use std::sync::Arc;
use tokio::sync::watch;

/// Clonable cancellation signal. `cancel()` is idempotent; clones
/// observe the same state.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Requests cancellation. Safe to call any number of times.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
