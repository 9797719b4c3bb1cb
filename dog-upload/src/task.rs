//! Per-file transfer state machine.
//!
//! ```text
//!   Idle ──begin──▶ Uploading ──complete──▶ Complete
//!                     │   ▲
//!                 fail│   │retry (destination/transfer failures only)
//!                     ▼   │
//!                     Error ◀── validation rejection at admission
//! ```
//!
//! Every attempt owns a fresh cancellation token and a numbered identity.
//! Reports carrying a stale attempt number are ignored, so nothing from a
//! finished or cancelled attempt can touch the task again.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    FailureKind, FileDescriptor, RejectReason, SpeedEstimator, TaskId, TaskStatus, TransferTask,
};

/// What an attempt needs to run outside the orchestrator
#[derive(Debug, Clone)]
pub(crate) struct AttemptHandle {
    pub task_id: TaskId,
    pub attempt: u64,
    pub descriptor: FileDescriptor,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
struct Attempt {
    number: u64,
    cancel: CancellationToken,
    estimator: SpeedEstimator,
    /// Last processed sample, the baseline for the next throughput delta
    last_sample: Option<(u64, Instant)>,
}

impl Attempt {
    fn end(self) {
        self.cancel.cancel();
    }
}

/// How a progress report was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProgressOutcome {
    /// Not for the current attempt
    Ignored,
    /// Byte count updated, too soon for a new throughput sample
    Coalesced,
    /// Percent and ETA refreshed
    Sampled,
}

#[derive(Debug)]
pub(crate) struct Task {
    id: TaskId,
    descriptor: FileDescriptor,
    status: TaskStatus,
    progress_percent: u8,
    bytes_transferred: u64,
    eta_seconds: Option<u64>,
    storage_path: Option<String>,
    error_reason: Option<String>,
    failure: Option<FailureKind>,
    attempts: u64,
    attempt: Option<Attempt>,
}

impl Task {
    /// Create a task from a validator verdict.
    pub fn admitted(descriptor: FileDescriptor, verdict: Result<(), RejectReason>) -> Self {
        let mut task = Self {
            id: TaskId::new(),
            descriptor,
            status: TaskStatus::Idle,
            progress_percent: 0,
            bytes_transferred: 0,
            eta_seconds: None,
            storage_path: None,
            error_reason: None,
            failure: None,
            attempts: 0,
            attempt: None,
        };
        if let Err(reason) = verdict {
            task.reject(reason);
        }
        task
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn storage_path(&self) -> Option<&str> {
        self.storage_path.as_deref()
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    pub fn eta_seconds(&self) -> Option<u64> {
        self.eta_seconds
    }

    /// Error state caused by something a retry can fix
    pub fn is_retryable(&self) -> bool {
        self.status == TaskStatus::Error && self.failure.is_some_and(FailureKind::is_retryable)
    }

    /// Enter `Uploading` with a fresh attempt.
    ///
    /// Allowed from `Idle` and from retryable `Error`; resets progress.
    pub fn begin_attempt(&mut self, speed_window: usize) -> Option<AttemptHandle> {
        let allowed = match self.status {
            TaskStatus::Idle => true,
            TaskStatus::Error => self.is_retryable(),
            TaskStatus::Uploading | TaskStatus::Complete => false,
        };
        if !allowed {
            return None;
        }

        self.attempts += 1;
        let cancel = CancellationToken::new();
        self.attempt = Some(Attempt {
            number: self.attempts,
            cancel: cancel.clone(),
            estimator: SpeedEstimator::new(speed_window),
            last_sample: None,
        });

        self.status = TaskStatus::Uploading;
        self.progress_percent = 0;
        self.bytes_transferred = 0;
        self.eta_seconds = None;
        self.error_reason = None;
        self.failure = None;

        Some(AttemptHandle {
            task_id: self.id.clone(),
            attempt: self.attempts,
            descriptor: self.descriptor.clone(),
            cancel,
        })
    }

    fn current_attempt(&mut self, number: u64) -> Option<&mut Attempt> {
        if self.status != TaskStatus::Uploading {
            return None;
        }
        self.attempt.as_mut().filter(|a| a.number == number)
    }

    /// Destination known, bytes about to move
    pub fn destination_acquired(&mut self, attempt: u64, storage_path: String, at: Instant) -> bool {
        let Some(current) = self.current_attempt(attempt) else {
            return false;
        };
        current.last_sample = Some((0, at));
        self.storage_path = Some(storage_path);
        true
    }

    /// Apply a raw `(bytes_so_far, total_bytes)` report.
    ///
    /// Reports closer than `interval` to the last processed one only move
    /// the byte count.
    pub fn apply_progress(
        &mut self,
        attempt: u64,
        bytes_so_far: u64,
        total_bytes: u64,
        at: Instant,
        interval: Duration,
    ) -> ProgressOutcome {
        let size = self.descriptor.size;
        let Some(current) = self.current_attempt(attempt) else {
            return ProgressOutcome::Ignored;
        };

        let (prev_bytes, prev_at) = *current.last_sample.get_or_insert((0, at));
        let elapsed = at.saturating_duration_since(prev_at);
        let sampled = elapsed >= interval && elapsed > Duration::ZERO;

        let mut eta = None;
        if sampled {
            current
                .estimator
                .record(bytes_so_far.saturating_sub(prev_bytes), elapsed.as_secs_f64());
            current.last_sample = Some((bytes_so_far, at));
            eta = current.estimator.eta_seconds(size.saturating_sub(bytes_so_far));
        }

        self.bytes_transferred = self.bytes_transferred.max(bytes_so_far);
        if !sampled {
            return ProgressOutcome::Coalesced;
        }

        let percent = if total_bytes == 0 {
            0
        } else {
            ((bytes_so_far as f64 / total_bytes as f64) * 100.0).round().min(100.0) as u8
        };
        self.progress_percent = self.progress_percent.max(percent);
        self.eta_seconds = eta;
        ProgressOutcome::Sampled
    }

    /// `Uploading → Complete`
    pub fn complete(&mut self, attempt: u64) -> bool {
        if self.current_attempt(attempt).is_none() {
            return false;
        }
        if let Some(done) = self.attempt.take() {
            done.end();
        }
        self.status = TaskStatus::Complete;
        self.progress_percent = 100;
        self.bytes_transferred = self.descriptor.size;
        self.eta_seconds = None;
        true
    }

    /// `Uploading → Error`
    pub fn fail(&mut self, attempt: u64, kind: FailureKind, reason: String) -> bool {
        if self.current_attempt(attempt).is_none() {
            return false;
        }
        if let Some(done) = self.attempt.take() {
            done.end();
        }
        self.status = TaskStatus::Error;
        self.failure = Some(kind);
        self.error_reason = Some(reason);
        self.eta_seconds = None;
        true
    }

    /// Terminal validation failure
    pub fn reject(&mut self, reason: RejectReason) {
        if let Some(done) = self.attempt.take() {
            done.end();
        }
        self.status = TaskStatus::Error;
        self.failure = Some(FailureKind::Validation);
        self.error_reason = Some(reason.to_string());
        self.eta_seconds = None;
    }

    /// Abort the in-flight attempt, if any. Returns whether one was running.
    pub fn cancel(&mut self) -> bool {
        match self.attempt.take() {
            Some(running) => {
                running.end();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> TransferTask {
        TransferTask {
            id: self.id.clone(),
            descriptor: self.descriptor.clone(),
            status: self.status,
            progress_percent: self.progress_percent,
            bytes_transferred: self.bytes_transferred,
            eta_seconds: self.eta_seconds,
            storage_path: self.storage_path.clone(),
            error_reason: self.error_reason.clone(),
            failure: self.failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(100);

    fn uploading(size: usize) -> (Task, AttemptHandle, Instant) {
        let mut task = Task::admitted(FileDescriptor::from_bytes("a.mp3", vec![0u8; size]), Ok(()));
        let handle = task.begin_attempt(5).unwrap();
        let start = Instant::now();
        assert!(task.destination_acquired(handle.attempt, "submissions/a.mp3".into(), start));
        (task, handle, start)
    }

    #[test]
    fn admission_verdict_picks_initial_state() {
        let ok = Task::admitted(FileDescriptor::from_bytes("a.mp3", vec![1u8]), Ok(()));
        assert_eq!(ok.status(), TaskStatus::Idle);

        let rejected = Task::admitted(
            FileDescriptor::from_bytes("a.exe", vec![1u8]),
            Err(RejectReason::UnsupportedExtension { allowed: vec![".mp3".into()] }),
        );
        let view = rejected.snapshot();
        assert_eq!(view.status, TaskStatus::Error);
        assert_eq!(view.failure, Some(FailureKind::Validation));
        assert_eq!(view.error_reason.as_deref(), Some("Invalid format. Allowed: .mp3"));
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn begin_moves_to_uploading_with_fresh_token() {
        let (task, handle, _) = uploading(1000);
        assert_eq!(task.status(), TaskStatus::Uploading);
        assert_eq!(handle.attempt, 1);
        assert!(!handle.cancel.is_cancelled());
        assert_eq!(task.storage_path(), Some("submissions/a.mp3"));
    }

    #[test]
    fn reports_faster_than_interval_are_coalesced() {
        let (mut task, h, start) = uploading(1000);

        let outcome = task.apply_progress(h.attempt, 100, 1000, start + Duration::from_millis(50), INTERVAL);
        assert_eq!(outcome, ProgressOutcome::Coalesced);
        let view = task.snapshot();
        assert_eq!(view.bytes_transferred, 100);
        assert_eq!(view.progress_percent, 0);
        assert_eq!(view.eta_seconds, None);

        let outcome = task.apply_progress(h.attempt, 250, 1000, start + Duration::from_millis(250), INTERVAL);
        assert_eq!(outcome, ProgressOutcome::Sampled);
        let view = task.snapshot();
        assert_eq!(view.progress_percent, 25);
        // 250 bytes in 0.25s = 1000 B/s, 750 left
        assert_eq!(view.eta_seconds, Some(1));
    }

    #[test]
    fn throughput_delta_is_measured_from_last_processed_sample() {
        let (mut task, h, start) = uploading(10_000);
        let at = |ms| start + Duration::from_millis(ms);

        task.apply_progress(h.attempt, 1000, 10_000, at(1000), INTERVAL); // 1000 B/s
        task.apply_progress(h.attempt, 1500, 10_000, at(1050), INTERVAL); // coalesced
        task.apply_progress(h.attempt, 4000, 10_000, at(2000), INTERVAL); // 3000 B/s

        // avg 2000 B/s, 6000 left
        assert_eq!(task.eta_seconds(), Some(3));
        assert_eq!(task.progress_percent(), 40);
    }

    #[test]
    fn completion_pins_progress_and_tears_down_token() {
        let (mut task, h, start) = uploading(1000);
        task.apply_progress(h.attempt, 400, 1000, start + Duration::from_millis(200), INTERVAL);

        assert!(task.complete(h.attempt));
        let view = task.snapshot();
        assert_eq!(view.status, TaskStatus::Complete);
        assert_eq!(view.progress_percent, 100);
        assert_eq!(view.bytes_transferred, 1000);
        assert_eq!(view.eta_seconds, None);
        assert_eq!(view.storage_path.as_deref(), Some("submissions/a.mp3"));
        assert!(h.cancel.is_cancelled());

        // nothing from the finished attempt lands afterwards
        let late = task.apply_progress(h.attempt, 1000, 1000, start + Duration::from_secs(5), INTERVAL);
        assert_eq!(late, ProgressOutcome::Ignored);
        assert!(!task.fail(h.attempt, FailureKind::Transfer, "late".into()));
    }

    #[test]
    fn retry_starts_a_new_attempt_from_zero() {
        let (mut task, first, start) = uploading(1000);
        task.apply_progress(first.attempt, 400, 1000, start + Duration::from_millis(200), INTERVAL);
        assert!(task.fail(first.attempt, FailureKind::Transfer, "Network error during upload".into()));
        assert!(task.is_retryable());
        assert!(first.cancel.is_cancelled());

        let second = task.begin_attempt(5).unwrap();
        assert_eq!(second.attempt, 2);
        assert!(!second.cancel.is_cancelled());
        let view = task.snapshot();
        assert_eq!(view.status, TaskStatus::Uploading);
        assert_eq!(view.progress_percent, 0);
        assert_eq!(view.error_reason, None);

        let stale = task.apply_progress(first.attempt, 900, 1000, start + Duration::from_secs(1), INTERVAL);
        assert_eq!(stale, ProgressOutcome::Ignored);
    }

    #[test]
    fn cannot_begin_while_uploading_or_after_completion() {
        let (mut task, h, _) = uploading(10);
        assert!(task.begin_attempt(5).is_none());
        task.complete(h.attempt);
        assert!(task.begin_attempt(5).is_none());
    }

    #[test]
    fn cancel_invalidates_running_attempt() {
        let (mut task, h, _) = uploading(10);
        assert!(task.cancel());
        assert!(h.cancel.is_cancelled());
        assert!(!task.cancel());
        assert!(!task.complete(h.attempt));
    }

    #[test]
    fn percent_never_goes_backwards() {
        let (mut task, h, start) = uploading(1000);
        task.apply_progress(h.attempt, 500, 1000, start + Duration::from_millis(200), INTERVAL);
        // transport restates a smaller total mid-flight
        task.apply_progress(h.attempt, 500, 2000, start + Duration::from_millis(400), INTERVAL);
        assert_eq!(task.progress_percent(), 50);
    }
}
