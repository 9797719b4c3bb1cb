use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_stream::{Stream, StreamExt};
use tracing::{info, instrument, warn};

use crate::cleanup::CleanupCoordinator;
use crate::orchestrator::{AdmitReport, Command, Orchestrator};
use crate::{
    FileDescriptor, ManagerConfig, ObjectDeleter, SignedUrlIssuer, TaskId, TransferTask,
    UploadError, UploadEvent, UploadResult, UploadSnapshot, UploadTransport,
};

const COMMAND_CAPACITY: usize = 64;

struct Workers {
    orchestrator: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

/// Handle to a running upload manager.
///
/// Cheap to clone. Every clone talks to the same orchestrator, which keeps
/// running until [`shutdown`](Self::shutdown) is called or the last clone
/// is dropped.
#[derive(Clone)]
pub struct UploadManager {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<UploadSnapshot>,
    events: broadcast::Sender<UploadEvent>,
    workers: Arc<Mutex<Option<Workers>>>,
}

impl UploadManager {
    /// Start the orchestrator and cleanup worker on the current runtime
    pub fn new<I, T, D>(config: ManagerConfig, issuer: I, transport: T, deleter: D) -> Self
    where
        I: SignedUrlIssuer + 'static,
        T: UploadTransport + 'static,
        D: ObjectDeleter + 'static,
    {
        Self::from_parts(config, Arc::new(issuer), Arc::new(transport), Arc::new(deleter))
    }

    /// Same as [`new`](Self::new) for collaborators that are already shared
    pub fn from_parts(
        mut config: ManagerConfig,
        issuer: Arc<dyn SignedUrlIssuer>,
        transport: Arc<dyn UploadTransport>,
        deleter: Arc<dyn ObjectDeleter>,
    ) -> Self {
        config.event_capacity = config.event_capacity.max(1);
        config.speed_window = config.speed_window.max(1);

        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (reports, report_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(UploadSnapshot::default());
        let (events, _) = broadcast::channel(config.event_capacity);

        let (cleanup, cleanup_worker) = CleanupCoordinator::spawn(deleter);

        info!(
            max_tasks = config.rules.max_task_count,
            max_file_size = config.rules.max_file_size_bytes,
            "Starting upload manager"
        );

        let orchestrator = Orchestrator::new(
            config,
            issuer,
            transport,
            cleanup,
            reports,
            state_tx,
            events.clone(),
        );
        let orchestrator = tokio::spawn(orchestrator.run(command_rx, report_rx));

        Self {
            commands,
            state,
            events,
            workers: Arc::new(Mutex::new(Some(Workers {
                orchestrator,
                cleanup: cleanup_worker,
            }))),
        }
    }

    /// Validate and start uploading a batch of files.
    ///
    /// Files beyond the task ceiling are dropped and counted in the report.
    /// Files that fail validation still get a task, in `Error`.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn admit(&self, files: Vec<FileDescriptor>) -> UploadResult<AdmitReport> {
        self.request(|reply| Command::Admit {
            descriptors: files,
            reply,
        })
        .await
    }

    /// Cancel and discard a task. Completed uploads are deleted from storage.
    ///
    /// Returns `false` when the task does not exist.
    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn remove(&self, id: &TaskId) -> UploadResult<bool> {
        let id = id.clone();
        self.request(|reply| Command::Remove { id, reply }).await
    }

    /// Start a new attempt for a task that failed to reach storage.
    ///
    /// Returns `false` for unknown tasks, tasks not in `Error`, validation
    /// failures, and files that no longer pass validation.
    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn retry(&self, id: &TaskId) -> UploadResult<bool> {
        let id = id.clone();
        self.request(|reply| Command::Retry { id, reply }).await
    }

    /// Remove every task. Returns how many were discarded.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> UploadResult<usize> {
        self.request(|reply| Command::ClearAll { reply }).await
    }

    /// Current state of every task
    pub fn snapshot(&self) -> UploadSnapshot {
        self.state.borrow().clone()
    }

    pub fn task(&self, id: &TaskId) -> Option<TransferTask> {
        self.state.borrow().get(id).cloned()
    }

    /// Receiver that observes every published snapshot
    pub fn watch(&self) -> watch::Receiver<UploadSnapshot> {
        self.state.clone()
    }

    /// Snapshots as a stream, starting with the current one
    pub fn snapshots(&self) -> impl Stream<Item = UploadSnapshot> {
        WatchStream::new(self.state.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    /// Lifecycle events as a stream. Events missed by a slow consumer are skipped.
    pub fn events(&self) -> impl Stream<Item = UploadEvent> {
        BroadcastStream::new(self.events.subscribe()).filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(lagged) => {
                warn!(error = %lagged, "Upload event subscriber lagged");
                None
            }
        })
    }

    /// Whether the orchestrator is still accepting commands
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Cancel every in-flight attempt and stop the workers.
    ///
    /// Queued cleanup deletions are still carried out before this returns.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> UploadResult<()> {
        let workers = self.workers.lock().take();
        let Some(workers) = workers else {
            return Ok(());
        };

        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = done.await;
        }

        workers
            .orchestrator
            .await
            .map_err(UploadError::backend)?;
        workers
            .cleanup
            .await
            .map_err(UploadError::backend)?;

        info!("Upload manager shut down");
        Ok(())
    }

    async fn request<R>(&self, build: impl FnOnce(oneshot::Sender<R>) -> Command) -> UploadResult<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| UploadError::ManagerClosed)?;
        response.await.map_err(|_| UploadError::ManagerClosed)
    }
}

impl std::fmt::Debug for UploadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadManager")
            .field("running", &self.is_running())
            .field("tasks", &self.state.borrow().len())
            .finish()
    }
}
