//! In-process collaborators for tests and local development.
//!
//! [`MemoryUrlIssuer`] hands out `memory://` destinations, [`MemoryTransport`]
//! copies bytes into a shared [`MemoryObjectStore`], and [`ScriptedTransport`]
//! lets a test drive every attempt by hand.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::debug;
use uuid::Uuid;

use crate::{
    Destination, DestinationRequest, FileDescriptor, ObjectDeleter, ProgressSink,
    SignedUrlIssuer, UploadError, UploadResult, UploadTransport,
};

const WRITE_TARGET_SCHEME: &str = "memory://";

fn storage_path_for(filename: &str) -> String {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("submissions/{}{}", Uuid::new_v4(), ext)
}

#[derive(Default)]
struct IssuerState {
    requests: Vec<DestinationRequest>,
    reject_with: Option<String>,
}

/// Issues `submissions/<uuid>.<ext>` destinations and records every request
#[derive(Clone, Default)]
pub struct MemoryUrlIssuer {
    state: Arc<Mutex<IssuerState>>,
}

impl MemoryUrlIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decline every following request with `reason`
    pub fn reject_with<S: Into<String>>(&self, reason: S) {
        self.state.lock().reject_with = Some(reason.into());
    }

    /// Go back to issuing destinations
    pub fn accept(&self) {
        self.state.lock().reject_with = None;
    }

    pub fn requests(&self) -> Vec<DestinationRequest> {
        self.state.lock().requests.clone()
    }
}

#[async_trait]
impl SignedUrlIssuer for MemoryUrlIssuer {
    async fn issue(&self, request: &DestinationRequest) -> UploadResult<Destination> {
        let mut state = self.state.lock();
        state.requests.push(request.clone());

        if let Some(reason) = &state.reject_with {
            return Err(UploadError::destination_rejected(reason.clone()));
        }

        let storage_path = storage_path_for(&request.filename);
        debug!(storage_path = %storage_path, "Issued memory destination");
        Ok(Destination::new(
            format!("{WRITE_TARGET_SCHEME}{storage_path}"),
            storage_path,
        ))
    }
}

#[derive(Default)]
struct StoreState {
    objects: HashMap<String, Bytes>,
    deletes: Vec<String>,
    fail_deletes: bool,
}

/// Shared object map. Also the deleter for whatever it holds.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, storage_path: impl Into<String>, data: Bytes) {
        self.state.lock().objects.insert(storage_path.into(), data);
    }

    pub fn get(&self, storage_path: &str) -> Option<Bytes> {
        self.state.lock().objects.get(storage_path).cloned()
    }

    pub fn contains(&self, storage_path: &str) -> bool {
        self.state.lock().objects.contains_key(storage_path)
    }

    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().objects.is_empty()
    }

    /// Every delete request received, successful or not, in order
    pub fn delete_requests(&self) -> Vec<String> {
        self.state.lock().deletes.clone()
    }

    /// Make deletes fail until switched back
    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().fail_deletes = fail;
    }
}

#[async_trait]
impl ObjectDeleter for MemoryObjectStore {
    async fn delete(&self, storage_path: &str) -> UploadResult<()> {
        let mut state = self.state.lock();
        state.deletes.push(storage_path.to_string());
        if state.fail_deletes {
            return Err(UploadError::backend(std::io::Error::other(
                "memory store refused delete",
            )));
        }
        state.objects.remove(storage_path);
        Ok(())
    }
}

/// Copies the file into a [`MemoryObjectStore`], reporting progress per chunk
#[derive(Clone)]
pub struct MemoryTransport {
    store: MemoryObjectStore,
    chunk_delay: Option<Duration>,
    fail_next: Arc<Mutex<Option<u16>>>,
}

impl MemoryTransport {
    pub fn new(store: MemoryObjectStore) -> Self {
        Self {
            store,
            chunk_delay: None,
            fail_next: Arc::new(Mutex::new(None)),
        }
    }

    /// Pause after every chunk to simulate a slow link
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Answer the next completed transfer with a non-success status
    pub fn fail_next_with_status(&self, status: u16) {
        *self.fail_next.lock() = Some(status);
    }

    pub fn store(&self) -> &MemoryObjectStore {
        &self.store
    }
}

#[async_trait]
impl UploadTransport for MemoryTransport {
    async fn put(
        &self,
        destination: &Destination,
        descriptor: &FileDescriptor,
        progress: ProgressSink,
    ) -> UploadResult<()> {
        let total = descriptor.size;
        let mut body = BytesMut::new();
        let mut stream = descriptor.source.open();

        while let Some(chunk) = stream.next().await {
            if progress.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            body.extend_from_slice(&chunk?);
            if let Some(delay) = self.chunk_delay {
                tokio::time::sleep(delay).await;
            }
            progress.report(body.len() as u64, total);
        }

        if let Some(status) = self.fail_next.lock().take() {
            return Err(UploadError::HttpStatus { status });
        }

        self.store.put(destination.storage_path.clone(), body.freeze());
        Ok(())
    }
}

/// One attempt waiting for a test to decide its fate
pub struct AttemptControl {
    pub file_name: String,
    pub storage_path: String,
    pub total_bytes: u64,
    progress: ProgressSink,
    outcome: oneshot::Sender<UploadResult<()>>,
}

impl AttemptControl {
    /// Report `bytes_so_far` against the file's size
    pub fn progress(&self, bytes_so_far: u64) {
        self.progress.report(bytes_so_far, self.total_bytes);
    }

    pub fn progress_of(&self, bytes_so_far: u64, total_bytes: u64) {
        self.progress.report(bytes_so_far, total_bytes);
    }

    /// Whether the manager has already abandoned this attempt
    pub fn is_cancelled(&self) -> bool {
        self.progress.is_cancelled() || self.outcome.is_closed()
    }

    /// Acknowledge the write. Returns `false` if nobody was listening anymore.
    pub fn succeed(self) -> bool {
        self.outcome.send(Ok(())).is_ok()
    }

    pub fn fail(self, error: UploadError) -> bool {
        self.outcome.send(Err(error)).is_ok()
    }

    pub fn fail_with_status(self, status: u16) -> bool {
        self.fail(UploadError::HttpStatus { status })
    }
}

impl std::fmt::Debug for AttemptControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptControl")
            .field("file_name", &self.file_name)
            .field("storage_path", &self.storage_path)
            .field("total_bytes", &self.total_bytes)
            .finish()
    }
}

/// Transport whose attempts are completed by hand through a [`TransportScript`]
#[derive(Clone)]
pub struct ScriptedTransport {
    attempts: mpsc::UnboundedSender<AttemptControl>,
}

/// Receiving side of a [`ScriptedTransport`]
pub struct TransportScript {
    attempts: AsyncMutex<mpsc::UnboundedReceiver<AttemptControl>>,
}

impl ScriptedTransport {
    pub fn channel() -> (Self, TransportScript) {
        let (attempts, rx) = mpsc::unbounded_channel();
        (
            Self { attempts },
            TransportScript {
                attempts: AsyncMutex::new(rx),
            },
        )
    }
}

impl TransportScript {
    /// Wait for the next attempt to reach the transport.
    ///
    /// `None` once every transport clone is gone.
    pub async fn next_attempt(&self) -> Option<AttemptControl> {
        self.attempts.lock().await.recv().await
    }

    /// Attempt already waiting, if any
    pub fn try_next_attempt(&self) -> Option<AttemptControl> {
        self.attempts.try_lock().ok()?.try_recv().ok()
    }
}

#[async_trait]
impl UploadTransport for ScriptedTransport {
    async fn put(
        &self,
        destination: &Destination,
        descriptor: &FileDescriptor,
        progress: ProgressSink,
    ) -> UploadResult<()> {
        let (outcome, decided) = oneshot::channel();
        let control = AttemptControl {
            file_name: descriptor.name.clone(),
            storage_path: destination.storage_path.clone(),
            total_bytes: descriptor.size,
            progress,
            outcome,
        };

        if self.attempts.send(control).is_err() {
            return Err(UploadError::transfer_failed("Network error during upload"));
        }

        decided
            .await
            .unwrap_or_else(|_| Err(UploadError::transfer_failed("Network error during upload")))
    }
}
