//! Sequential completion delivery

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::{Result, TapedeckError};

type Job = Box<dyn FnOnce() + Send>;

/// Runs caller completions one at a time, in submission order
#[derive(Debug, Clone)]
pub(crate) struct Notifier {
    tx: mpsc::UnboundedSender<Job>,
}

impl Notifier {
    /// Spawn the delivery worker on the current runtime
    ///
    /// # Errors
    ///
    /// Returns error if called outside a Tokio runtime
    pub(crate) fn spawn() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            TapedeckError::ConfigError(format!("A session must be created inside a Tokio runtime: {e}"))
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });

        Ok(Self { tx })
    }

    /// Run `job` on the worker and wait until it has run
    pub(crate) async fn deliver<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let (ack_tx, ack_rx) = oneshot::channel();
        let wrapped: Job = Box::new(move || {
            job();
            let _ = ack_tx.send(());
        });

        match self.tx.send(wrapped) {
            Ok(()) => {
                if ack_rx.await.is_err() {
                    warn!("Completion handler did not finish");
                }
            }
            Err(mpsc::error::SendError(job)) => {
                // worker is gone; deliver on the caller's task
                job();
            }
        }
    }
}
