//! # dog-upload: Concurrent uploads to signed-URL object storage
//!
//! `dog-upload` manages a small collection of files moving in parallel from
//! the local side to remote object storage. Each file gets a transfer task
//! with its own state machine, progress, ETA and cancellation. Removed
//! uploads are cleaned out of storage in the background.
//!
//! ## Key Features
//!
//! - **Validation before transfer**: extension allow-list and size ceiling, checked on admission and again on retry
//! - **Signed-URL flow**: a destination is requested per attempt, then bytes are streamed straight to storage
//! - **Throttled progress**: percent and ETA refreshed at most every 100 ms from a rolling throughput window
//! - **Cancel-wins**: every attempt owns a fresh token; nothing from a cancelled or superseded attempt touches state
//! - **Fire-and-forget cleanup**: removing a completed upload deletes the stored object without blocking the caller
//! - **Pluggable collaborators**: issuer, transport and deleter are traits, with memory and HTTP implementations
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_upload::prelude::*;
//! use dog_upload::{MemoryObjectStore, MemoryTransport, MemoryUrlIssuer};
//!
//! # #[tokio::main]
//! # async fn main() -> UploadResult<()> {
//! let store = MemoryObjectStore::new();
//! let manager = UploadManager::new(
//!     ManagerConfig::default(),
//!     MemoryUrlIssuer::new(),
//!     MemoryTransport::new(store.clone()),
//!     store.clone(),
//! );
//!
//! let report = manager
//!     .admit(vec![
//!         FileDescriptor::from_bytes("demo.mp3", vec![0u8; 4096]).with_content_type("audio/mpeg"),
//!         FileDescriptor::from_bytes("notes.txt", b"not audio".to_vec()),
//!     ])
//!     .await?;
//! assert_eq!(report.admitted.len(), 1);
//! assert_eq!(report.rejected.len(), 1);
//!
//! let mut state = manager.watch();
//! state
//!     .wait_for(|s| !s.is_uploading())
//!     .await
//!     .map_err(|_| UploadError::ManagerClosed)?;
//!
//! let snapshot = manager.snapshot();
//! assert!(snapshot.has_errors());
//! assert_eq!(snapshot.completed_tasks().len(), 1);
//!
//! manager.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   commands    ┌──────────────┐  spawn   ┌──────────────┐
//! │  UploadManager   │ ────────────▶ │ Orchestrator │ ───────▶ │   attempt    │
//! │ (cloneable handle│ ◀──────────── │  (one actor, │ ◀─────── │ issuer, then │
//! │  watch + events) │   snapshots   │  owns tasks) │ reports  │  transport   │
//! └──────────────────┘               └──────┬───────┘          └──────────────┘
//!                                           │ storage paths
//!                                           ▼
//!                                  ┌──────────────────┐
//!                                  │ CleanupCoordinator│ ──▶ ObjectDeleter
//!                                  └──────────────────┘
//! ```
//!
//! All task mutations go through the orchestrator, one at a time. Callers
//! read state through [`UploadSnapshot`]s and [`UploadEvent`]s.

mod cleanup;
mod config;
mod error;
mod events;
pub mod format;
mod manager;
mod orchestrator;
mod snapshot;
mod speed;
pub mod store;
mod task;
mod transfer;
mod types;
mod validation;

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "http")]
mod http;

// Re-export main types for clean API
pub use cleanup::CleanupCoordinator;
pub use config::{ManagerConfig, UploadRules};
pub use error::{FailureKind, RejectReason, UploadError, UploadResult};
pub use events::UploadEvent;
pub use format::{format_bytes, format_eta};
pub use manager::UploadManager;
pub use orchestrator::AdmitReport;
pub use snapshot::UploadSnapshot;
pub use speed::SpeedEstimator;
pub use store::{ObjectDeleter, ProgressSink, SignedUrlIssuer, UploadTransport};
pub use types::{
    ByteStream, Destination, DestinationRequest, FileDescriptor, FileSource, TaskId, TaskStatus,
    TransferTask,
};
pub use validation::Validator;

#[cfg(feature = "memory")]
pub use memory::{
    AttemptControl, MemoryObjectStore, MemoryTransport, MemoryUrlIssuer, ScriptedTransport,
    TransportScript,
};

#[cfg(feature = "http")]
pub use http::{HttpObjectDeleter, HttpTransport, HttpUrlIssuer};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AdmitReport, FileDescriptor, ManagerConfig, TaskId, TaskStatus, TransferTask,
        UploadError, UploadEvent, UploadManager, UploadResult, UploadRules, UploadSnapshot,
    };

    pub use crate::{ObjectDeleter, ProgressSink, SignedUrlIssuer, UploadTransport};

    pub use async_trait::async_trait;
}
