use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::format::format_bytes_whole_mb;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Errors that can occur while managing uploads
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("{reason}")]
    DestinationRejected { reason: String },

    #[error("{reason}")]
    TransferFailed { reason: String },

    #[error("Upload failed with status {status}")]
    HttpStatus { status: u16 },

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Upload manager is no longer running")]
    ManagerClosed,

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl UploadError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create a destination rejection
    pub fn destination_rejected<S: Into<String>>(reason: S) -> Self {
        Self::DestinationRejected {
            reason: reason.into(),
        }
    }

    /// Create a transfer failure
    pub fn transfer_failed<S: Into<String>>(reason: S) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    /// Which failure class a task lands in when this error ends an attempt.
    ///
    /// `None` for errors that never put a task into `Error`.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::DestinationRejected { .. } => Some(FailureKind::Destination),
            Self::TransferFailed { .. }
            | Self::HttpStatus { .. }
            | Self::Io { .. }
            | Self::Backend { .. } => Some(FailureKind::Transfer),
            Self::Cancelled | Self::ManagerClosed => None,
        }
    }

    /// Check if a task failed with this error may be retried
    pub fn is_retryable(&self) -> bool {
        self.failure_kind().is_some_and(FailureKind::is_retryable)
    }
}

/// Why the validator refused a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Extension missing or not in the allow-list
    UnsupportedExtension { allowed: Vec<String> },
    /// Size above the configured maximum
    FileTooLarge { max_bytes: u64 },
}

impl RejectReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedExtension { .. } => "unsupported_extension",
            Self::FileTooLarge { .. } => "file_too_large",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedExtension { allowed } => {
                write!(f, "Invalid format. Allowed: {}", allowed.join(", "))
            }
            Self::FileTooLarge { max_bytes } => {
                write!(f, "File too large. Maximum: {}", format_bytes_whole_mb(*max_bytes))
            }
        }
    }
}

/// Failure class recorded on a task in `Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Rejected by the validator, terminal until the file changes
    Validation,
    /// The URL-issuing service was unreachable or declined
    Destination,
    /// Network fault or non-success completion status
    Transfer,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Validation)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Destination => "destination",
            Self::Transfer => "transfer",
        }
    }
}
