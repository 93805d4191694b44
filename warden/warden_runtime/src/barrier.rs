//! One-shot deferred signals and the singular-mode barrier.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// A signal that resolves exactly once. Never reused: each cycle arms a
/// fresh one.
pub struct Deferred {
    tx: watch::Sender<bool>,
}

impl Deferred {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn resolve(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_resolved(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until resolved. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|resolved| *resolved).await;
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

/// "Previous tenant fully unmounted" signal shared by every tenant of one
/// orchestrator. At most one signal is outstanding.
#[derive(Default)]
pub struct SingularBarrier {
    current: Mutex<Option<Arc<Deferred>>>,
}

impl SingularBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the outstanding signal with a fresh one.
    pub fn arm(&self) -> Arc<Deferred> {
        let deferred = Arc::new(Deferred::new());
        *self.current.lock() = Some(deferred.clone());
        debug!("Armed singular barrier");
        deferred
    }

    /// Wait for the outstanding signal, if any.
    pub async fn wait(&self) {
        let current = self.current.lock().clone();
        if let Some(deferred) = current {
            deferred.wait().await;
        }
    }

    /// Whether a signal is armed and still unresolved.
    pub fn is_blocking(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .map(|d| !d.is_resolved())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_without_signal_returns() {
        let barrier = SingularBarrier::new();
        barrier.wait().await;
        assert!(!barrier.is_blocking());
    }

    #[tokio::test]
    async fn test_wait_blocks_until_resolved() {
        let barrier = Arc::new(SingularBarrier::new());
        let deferred = barrier.arm();
        assert!(barrier.is_blocking());

        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        deferred.resolve();
        waiter.await.unwrap();
        assert!(!barrier.is_blocking());
    }

    #[tokio::test]
    async fn test_resolved_deferred_stays_resolved() {
        let deferred = Deferred::new();
        deferred.resolve();
        deferred.resolve();
        deferred.wait().await;
        assert!(deferred.is_resolved());
    }
}
