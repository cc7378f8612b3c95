//! Broadcast shutdown signal built on a tokio watch channel.

use tokio::sync::watch;

use crate::error::{ErrorKind, TransferResult};
use crate::transfer_error;

/// Sending side of the shutdown signal.
///
/// Cloning is cheap and every clone signals the same set of receivers.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Signals shutdown to every receiver.
    ///
    /// Fails only when no receiver is left, in which case nothing is listening anyway.
    pub fn shutdown(&self) -> TransferResult<()> {
        self.0.send(true).map_err(|_| {
            transfer_error!(
                ErrorKind::InvalidState,
                "Shutdown signal could not be delivered",
                "no shutdown receiver is alive"
            )
        })
    }

    /// Creates a new receiver, already shut down if the signal was sent before.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until shutdown is signaled.
    ///
    /// Returns immediately if it already was. A dropped sender also counts as shutdown.
    pub async fn wait_for_shutdown(&mut self) {
        let _ = self.0.wait_for(|shutdown| *shutdown).await;
    }
}

/// Creates a connected shutdown sender and receiver.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn receivers_observe_shutdown() {
        let (tx, mut rx) = create_shutdown_channel();
        let mut late_rx = tx.subscribe();
        assert!(!rx.is_shutdown());

        let waiter = tokio::spawn(async move {
            rx.wait_for_shutdown().await;
            rx.is_shutdown()
        });

        tx.shutdown().unwrap();
        assert!(waiter.await.unwrap());

        tokio::time::timeout(Duration::from_secs(1), late_rx.wait_for_shutdown())
            .await
            .unwrap();
        assert!(tx.subscribe().is_shutdown());
    }

    #[tokio::test]
    async fn dropped_sender_releases_waiters() {
        let (tx, mut rx) = create_shutdown_channel();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), rx.wait_for_shutdown())
            .await
            .unwrap();
    }

    #[test]
    fn shutdown_without_receivers_fails() {
        let (tx, rx) = create_shutdown_channel();
        drop(rx);
        assert!(tx.shutdown().is_err());
    }
}
