use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::task::AttemptHandle;
use crate::{
    DestinationRequest, FailureKind, ProgressSink, SignedUrlIssuer, TaskId, UploadTransport,
};

/// What a running attempt tells the orchestrator
#[derive(Debug)]
pub(crate) enum Report {
    DestinationAcquired {
        task_id: TaskId,
        attempt: u64,
        storage_path: String,
        at: Instant,
    },
    Progress {
        task_id: TaskId,
        attempt: u64,
        bytes_so_far: u64,
        total_bytes: u64,
        at: Instant,
    },
    Completed {
        task_id: TaskId,
        attempt: u64,
    },
    Failed {
        task_id: TaskId,
        attempt: u64,
        kind: FailureKind,
        reason: String,
    },
}

/// Drive one attempt: acquire a destination, then stream the bytes.
///
/// Sends nothing once the attempt's token is cancelled.
#[instrument(skip_all, fields(task_id = %handle.task_id, attempt = handle.attempt))]
pub(crate) async fn run_attempt(
    handle: AttemptHandle,
    issuer: Arc<dyn SignedUrlIssuer>,
    transport: Arc<dyn UploadTransport>,
    reports: mpsc::UnboundedSender<Report>,
) {
    let cancel = handle.cancel.clone();

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Upload cancelled");
            return;
        }
        outcome = drive(&handle, issuer.as_ref(), transport.as_ref(), &reports) => outcome,
    };

    if cancel.is_cancelled() {
        return;
    }

    let report = match outcome {
        Ok(()) => Report::Completed {
            task_id: handle.task_id,
            attempt: handle.attempt,
        },
        Err((kind, reason)) => {
            warn!(kind = kind.name(), reason = %reason, "Upload attempt failed");
            Report::Failed {
                task_id: handle.task_id,
                attempt: handle.attempt,
                kind,
                reason,
            }
        }
    };
    let _ = reports.send(report);
}

async fn drive(
    handle: &AttemptHandle,
    issuer: &dyn SignedUrlIssuer,
    transport: &dyn UploadTransport,
    reports: &mpsc::UnboundedSender<Report>,
) -> Result<(), (FailureKind, String)> {
    let request = DestinationRequest::for_descriptor(&handle.descriptor);
    let destination = issuer
        .issue(&request)
        .await
        .map_err(|e| (FailureKind::Destination, e.to_string()))?;

    debug!(storage_path = %destination.storage_path, "Destination acquired");
    let _ = reports.send(Report::DestinationAcquired {
        task_id: handle.task_id.clone(),
        attempt: handle.attempt,
        storage_path: destination.storage_path.clone(),
        at: Instant::now(),
    });

    let sink = {
        let reports = reports.clone();
        let task_id = handle.task_id.clone();
        let attempt = handle.attempt;
        ProgressSink::new(handle.cancel.clone(), move |bytes_so_far, total_bytes| {
            let _ = reports.send(Report::Progress {
                task_id: task_id.clone(),
                attempt,
                bytes_so_far,
                total_bytes,
                at: Instant::now(),
            });
        })
    };

    transport
        .put(&destination, &handle.descriptor, sink)
        .await
        .map_err(|e| (e.failure_kind().unwrap_or(FailureKind::Transfer), e.to_string()))
}
