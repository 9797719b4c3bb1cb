use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FailureKind, TaskId};

/// Lifecycle notifications published by the upload manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UploadEvent {
    /// File passed validation and got a task
    Admitted {
        task_id: TaskId,
        file_name: String,
        at: DateTime<Utc>,
    },

    /// File failed validation; its task sits in `Error`
    Rejected {
        task_id: TaskId,
        reason: String,
        at: DateTime<Utc>,
    },

    /// Files beyond the task ceiling were ignored
    BatchTruncated {
        requested: usize,
        dropped: usize,
        at: DateTime<Utc>,
    },

    /// A transfer attempt began
    Started {
        task_id: TaskId,
        attempt: u64,
        at: DateTime<Utc>,
    },

    /// The URL-issuing service handed back a destination
    DestinationAcquired {
        task_id: TaskId,
        storage_path: String,
        at: DateTime<Utc>,
    },

    /// Throttled progress sample
    Progress {
        task_id: TaskId,
        percent: u8,
        eta_seconds: Option<u64>,
        at: DateTime<Utc>,
    },

    /// Transfer finished successfully
    Completed {
        task_id: TaskId,
        storage_path: Option<String>,
        at: DateTime<Utc>,
    },

    /// Transfer attempt failed
    Failed {
        task_id: TaskId,
        kind: FailureKind,
        error: String,
        at: DateTime<Utc>,
    },

    /// Task removed by the caller
    Removed {
        task_id: TaskId,
        at: DateTime<Utc>,
    },

    /// Collection cleared
    Cleared {
        count: usize,
        at: DateTime<Utc>,
    },
}

impl UploadEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Admitted { .. } => "admitted",
            Self::Rejected { .. } => "rejected",
            Self::BatchTruncated { .. } => "batch_truncated",
            Self::Started { .. } => "started",
            Self::DestinationAcquired { .. } => "destination_acquired",
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Removed { .. } => "removed",
            Self::Cleared { .. } => "cleared",
        }
    }

    /// Task the event is about, if it concerns a single task
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Admitted { task_id, .. }
            | Self::Rejected { task_id, .. }
            | Self::Started { task_id, .. }
            | Self::DestinationAcquired { task_id, .. }
            | Self::Progress { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. }
            | Self::Removed { task_id, .. } => Some(task_id),
            Self::BatchTruncated { .. } | Self::Cleared { .. } => None,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Admitted { at, .. }
            | Self::Rejected { at, .. }
            | Self::BatchTruncated { at, .. }
            | Self::Started { at, .. }
            | Self::DestinationAcquired { at, .. }
            | Self::Progress { at, .. }
            | Self::Completed { at, .. }
            | Self::Failed { at, .. }
            | Self::Removed { at, .. }
            | Self::Cleared { at, .. } => at,
        }
    }
}
