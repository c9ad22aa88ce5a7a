//! Cooperative cancellation token
//!
//! Checked by the turn controller at every suspension point and at segment
//! boundaries during streaming synthesis. Cancelling is idempotent and
//! observable from any number of clones.

use tokio::sync::watch;

/// Cloneable cancellation flag
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Signal cancellation
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Has cancellation been signalled?
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancellation is signalled
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                // All senders gone without a cancel; treat as never.
                futures::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        token.cancel();
        timeout(Duration::from_millis(100), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_not_cancelled_by_default() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(
            timeout(Duration::from_millis(20), token.cancelled())
                .await
                .is_err()
        );
    }
}
