use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{Destination, DestinationRequest, FileDescriptor, UploadResult};

/// Issues one-time write destinations (signed URLs)
#[async_trait]
pub trait SignedUrlIssuer: Send + Sync {
    /// Get a write target and storage path for a file.
    ///
    /// A rejection is reported as an error and treated like any other
    /// retryable failure.
    async fn issue(&self, request: &DestinationRequest) -> UploadResult<Destination>;
}

/// Moves a file's bytes to a destination
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Stream the descriptor's bytes to `destination.write_target`,
    /// reporting `(bytes_so_far, total_bytes)` through `progress`.
    ///
    /// Returns once the target acknowledged the write. The caller may drop
    /// this future at any point to cancel.
    async fn put(
        &self,
        destination: &Destination,
        descriptor: &FileDescriptor,
        progress: ProgressSink,
    ) -> UploadResult<()>;
}

/// Removes stored objects
#[async_trait]
pub trait ObjectDeleter: Send + Sync {
    async fn delete(&self, storage_path: &str) -> UploadResult<()>;
}

type ReportFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Progress callback handed to a transport for one attempt.
///
/// Reports stop being delivered the moment the attempt's cancellation
/// token fires.
#[derive(Clone)]
pub struct ProgressSink {
    cancel: CancellationToken,
    report: ReportFn,
}

impl ProgressSink {
    pub fn new<F>(cancel: CancellationToken, report: F) -> Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        Self {
            cancel,
            report: Arc::new(report),
        }
    }

    /// A sink that discards everything
    pub fn noop() -> Self {
        Self::new(CancellationToken::new(), |_, _| {})
    }

    pub fn report(&self, bytes_so_far: u64, total_bytes: u64) {
        if self.cancel.is_cancelled() {
            return;
        }
        (self.report)(bytes_so_far, total_bytes);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token for transports that want to stop cooperatively
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn cancelled_sink_swallows_reports() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        let sink = {
            let seen = seen.clone();
            ProgressSink::new(token.clone(), move |bytes, total| seen.lock().push((bytes, total)))
        };

        sink.report(10, 100);
        token.cancel();
        sink.report(20, 100);

        assert!(sink.is_cancelled());
        assert_eq!(*seen.lock(), vec![(10, 100)]);
    }
}
