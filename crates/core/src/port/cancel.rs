// Execution Cancellation Token

use tokio::sync::watch;

/// Cancellation signal observed by a running command
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the cancellation signal
    ///
    /// Pends forever if the sender is dropped without cancelling, so it can sit
    /// in a `select!` next to the process without ending it early.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Cancellation sender, held by the execution handle
#[derive(Clone)]
pub struct CancelSender {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl CancelSender {
    /// Request cancellation; returns false if it was already requested
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|cancelled| {
            let first = !*cancelled;
            *cancelled = true;
            first
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Create a cancellation channel
pub fn cancel_channel() -> (CancelSender, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (
        CancelSender {
            tx: std::sync::Arc::new(tx),
        },
        CancelToken { rx },
    )
}
