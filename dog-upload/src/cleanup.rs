use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ObjectDeleter;

/// Fire-and-forget deletion of objects left behind by removed tasks.
///
/// Requests go onto an unbounded queue drained by a background worker.
/// Failures are logged and dropped; nothing flows back to the caller.
#[derive(Clone)]
pub struct CleanupCoordinator {
    queue: mpsc::UnboundedSender<String>,
}

impl CleanupCoordinator {
    /// Start the cleanup worker on the current runtime.
    ///
    /// The worker drains outstanding requests and exits once every
    /// coordinator clone has been dropped.
    pub fn spawn(deleter: Arc<dyn ObjectDeleter>) -> (Self, JoinHandle<()>) {
        let (queue, requests) = mpsc::unbounded_channel();
        let worker = CleanupWorker { deleter, requests };
        let handle = tokio::spawn(worker.run());
        (Self { queue }, handle)
    }

    /// Queue a best-effort deletion. Never blocks.
    pub fn delete<S: Into<String>>(&self, storage_path: S) {
        let storage_path = storage_path.into();
        if self.queue.send(storage_path).is_err() {
            warn!("Cleanup worker stopped, object left in storage");
        }
    }
}

struct CleanupWorker {
    deleter: Arc<dyn ObjectDeleter>,
    requests: mpsc::UnboundedReceiver<String>,
}

impl CleanupWorker {
    async fn run(mut self) {
        debug!("Cleanup worker started");

        while let Some(storage_path) = self.requests.recv().await {
            match self.deleter.delete(&storage_path).await {
                Ok(()) => info!(storage_path = %storage_path, "Deleted file from storage"),
                Err(e) => warn!(
                    storage_path = %storage_path,
                    error = %e,
                    "Failed to delete file from storage"
                ),
            }
        }

        debug!("Cleanup worker stopped");
    }
}
