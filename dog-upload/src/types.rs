use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::pin::Pin;
use uuid::Uuid;

use crate::FailureKind;

/// Stream of bytes for upload content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Unique identifier for a transfer task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random task ID
    pub fn new() -> Self {
        Self(format!("upl_{}", Uuid::new_v4().simple()))
    }

    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Where a file's bytes come from
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Bytes already in memory
    Memory(Bytes),
    /// A file on local disk, read lazily
    Path(PathBuf),
}

impl FileSource {
    /// Open the source as a chunked byte stream
    pub fn open(&self) -> ByteStream {
        match self {
            Self::Memory(data) => {
                let data = data.clone();
                Box::pin(async_stream::stream! {
                    let mut offset = 0;
                    while offset < data.len() {
                        let end = (offset + READ_CHUNK_BYTES).min(data.len());
                        yield Ok(data.slice(offset..end));
                        offset = end;
                    }
                })
            }
            Self::Path(path) => {
                let path = path.clone();
                Box::pin(async_stream::stream! {
                    match tokio::fs::File::open(&path).await {
                        Ok(file) => {
                            let mut reader =
                                tokio_util::io::ReaderStream::with_capacity(file, READ_CHUNK_BYTES);
                            while let Some(chunk) = futures_util::StreamExt::next(&mut reader).await {
                                yield chunk;
                            }
                        }
                        Err(e) => yield Err(e),
                    }
                })
            }
        }
    }
}

/// Caller-supplied description of one file. Never mutated.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub name: String,
    /// Declared content type, may be empty
    pub content_type: String,
    pub size: u64,
    pub source: FileSource,
}

impl FileDescriptor {
    pub fn new<S: Into<String>>(name: S, size: u64, source: FileSource) -> Self {
        Self {
            name: name.into(),
            content_type: String::new(),
            size,
            source,
        }
    }

    /// Descriptor over an in-memory buffer
    pub fn from_bytes<S: Into<String>>(name: S, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self::new(name, data.len() as u64, FileSource::Memory(data))
    }

    /// Descriptor over a file on disk, sized from its metadata
    pub async fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let size = tokio::fs::metadata(&path).await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, size, FileSource::Path(path)))
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Content type sent to collaborators
    pub fn effective_content_type(&self) -> &str {
        if self.content_type.is_empty() {
            "application/octet-stream"
        } else {
            &self.content_type
        }
    }

    /// Lowercase trailing dot-segment including the dot, if any
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.name.rsplit_once('.')?;
        Some(format!(".{}", ext.to_ascii_lowercase()))
    }
}

/// Lifecycle state of a transfer task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Idle,
    Uploading,
    Complete,
    Error,
}

impl TaskStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Uploading => "uploading",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// Read-only view of a task as observers see it
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub id: TaskId,
    pub descriptor: FileDescriptor,
    pub status: TaskStatus,
    pub progress_percent: u8,
    pub bytes_transferred: u64,
    pub eta_seconds: Option<u64>,
    pub storage_path: Option<String>,
    pub error_reason: Option<String>,
    pub failure: Option<FailureKind>,
}

/// Request sent to the URL-issuing service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRequest {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
}

impl DestinationRequest {
    pub fn for_descriptor(descriptor: &FileDescriptor) -> Self {
        Self {
            filename: descriptor.name.clone(),
            content_type: descriptor.effective_content_type().to_string(),
            size_bytes: descriptor.size,
        }
    }
}

/// One-time write target plus the opaque path of the object it creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub write_target: String,
    pub storage_path: String,
}

impl Destination {
    pub fn new<W: Into<String>, P: Into<String>>(write_target: W, storage_path: P) -> Self {
        Self {
            write_target: write_target.into(),
            storage_path: storage_path.into(),
        }
    }
}
