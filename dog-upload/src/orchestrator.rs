//! Single serializing actor that owns the task collection.
//!
//! Caller operations arrive as [`Command`]s, running attempts talk back
//! through [`Report`]s. Both are applied one at a time by [`Orchestrator::run`],
//! which republishes the [`UploadSnapshot`] after every mutation.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::cleanup::CleanupCoordinator;
use crate::task::{ProgressOutcome, Task};
use crate::transfer::{run_attempt, Report};
use crate::{
    FileDescriptor, ManagerConfig, SignedUrlIssuer, TaskId, TaskStatus, UploadEvent,
    UploadSnapshot, UploadTransport, Validator,
};

/// Outcome of an admission request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmitReport {
    /// Tasks created and started, in caller order
    pub admitted: Vec<TaskId>,
    /// Tasks created directly in `Error` by validation
    pub rejected: Vec<TaskId>,
    /// Files ignored because the task ceiling was reached
    pub dropped: usize,
}

impl AdmitReport {
    /// Every task created by this admission, accepted or not
    pub fn created(&self) -> usize {
        self.admitted.len() + self.rejected.len()
    }

    pub fn is_partial(&self) -> bool {
        self.dropped > 0
    }
}

pub(crate) enum Command {
    Admit {
        descriptors: Vec<FileDescriptor>,
        reply: oneshot::Sender<AdmitReport>,
    },
    Remove {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    Retry {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    ClearAll {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct Orchestrator {
    tasks: Vec<Task>,
    validator: Validator,
    config: ManagerConfig,
    issuer: Arc<dyn SignedUrlIssuer>,
    transport: Arc<dyn UploadTransport>,
    cleanup: CleanupCoordinator,
    reports: mpsc::UnboundedSender<Report>,
    state: watch::Sender<UploadSnapshot>,
    events: broadcast::Sender<UploadEvent>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: ManagerConfig,
        issuer: Arc<dyn SignedUrlIssuer>,
        transport: Arc<dyn UploadTransport>,
        cleanup: CleanupCoordinator,
        reports: mpsc::UnboundedSender<Report>,
        state: watch::Sender<UploadSnapshot>,
        events: broadcast::Sender<UploadEvent>,
    ) -> Self {
        Self {
            tasks: Vec::new(),
            validator: Validator::new(config.rules.clone()),
            config,
            issuer,
            transport,
            cleanup,
            reports,
            state,
            events,
        }
    }

    /// Apply commands and reports until shutdown or until every handle is gone
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut reports: mpsc::UnboundedReceiver<Report>,
    ) {
        info!("Upload orchestrator started");

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.cancel_in_flight();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.cancel_in_flight();
                        break;
                    }
                },

                Some(report) = reports.recv() => self.handle_report(report),
            }
        }

        info!("Upload orchestrator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Admit { descriptors, reply } => {
                let report = self.admit(descriptors);
                let _ = reply.send(report);
            }
            Command::Remove { id, reply } => {
                let removed = self.remove(&id);
                let _ = reply.send(removed);
            }
            Command::Retry { id, reply } => {
                let restarted = self.retry(&id);
                let _ = reply.send(restarted);
            }
            Command::ClearAll { reply } => {
                let cleared = self.clear_all();
                let _ = reply.send(cleared);
            }
            // handled by the run loop
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn admit(&mut self, descriptors: Vec<FileDescriptor>) -> AdmitReport {
        let requested = descriptors.len();
        let max = self.config.rules.max_task_count;
        let available = max.saturating_sub(self.tasks.len());
        let mut report = AdmitReport::default();

        if available == 0 {
            warn!(requested, "Maximum {} tracks allowed, batch dropped", max);
            report.dropped = requested;
            if requested > 0 {
                self.emit(UploadEvent::BatchTruncated {
                    requested,
                    dropped: requested,
                    at: Utc::now(),
                });
            }
            return report;
        }

        report.dropped = requested.saturating_sub(available);

        for descriptor in descriptors.into_iter().take(available) {
            let verdict = self.validator.validate(&descriptor);
            let mut task = Task::admitted(descriptor, verdict);
            let id = task.id().clone();

            if task.status() == TaskStatus::Error {
                let reason = task.snapshot().error_reason.unwrap_or_default();
                info!(task_id = %id, file = %task.descriptor().name, reason = %reason, "File rejected");
                self.emit(UploadEvent::Rejected {
                    task_id: id.clone(),
                    reason,
                    at: Utc::now(),
                });
                self.tasks.push(task);
                report.rejected.push(id);
                continue;
            }

            info!(task_id = %id, file = %task.descriptor().name, size = task.descriptor().size, "File admitted");
            self.emit(UploadEvent::Admitted {
                task_id: id.clone(),
                file_name: task.descriptor().name.clone(),
                at: Utc::now(),
            });
            self.start(&mut task);
            self.tasks.push(task);
            report.admitted.push(id);
        }

        if report.dropped > 0 {
            warn!(
                requested,
                dropped = report.dropped,
                "Maximum {} tracks allowed, extra files ignored", max
            );
            self.emit(UploadEvent::BatchTruncated {
                requested,
                dropped: report.dropped,
                at: Utc::now(),
            });
        }

        self.publish();
        report
    }

    fn remove(&mut self, id: &TaskId) -> bool {
        let Some(index) = self.tasks.iter().position(|t| t.id() == id) else {
            debug!(task_id = %id, "Remove for unknown task ignored");
            return false;
        };

        let task = self.tasks.remove(index);
        self.discard(task);
        self.emit(UploadEvent::Removed {
            task_id: id.clone(),
            at: Utc::now(),
        });
        self.publish();
        true
    }

    fn clear_all(&mut self) -> usize {
        let tasks = std::mem::take(&mut self.tasks);
        let count = tasks.len();
        for task in tasks {
            self.discard(task);
        }

        info!(count, "Cleared all uploads");
        self.emit(UploadEvent::Cleared {
            count,
            at: Utc::now(),
        });
        self.publish();
        count
    }

    /// Cancel whatever is running and hand completed objects to cleanup
    fn discard(&self, mut task: Task) {
        if task.cancel() {
            info!(task_id = %task.id(), "Cancelled in-flight upload");
        }
        if task.status() == TaskStatus::Complete {
            if let Some(path) = task.storage_path() {
                self.cleanup.delete(path);
            }
        }
    }

    fn retry(&mut self, id: &TaskId) -> bool {
        let Some(index) = self.tasks.iter().position(|t| t.id() == id) else {
            return false;
        };

        if !self.tasks[index].is_retryable() {
            debug!(task_id = %id, status = self.tasks[index].status().name(), "Retry ignored");
            return false;
        }

        let mut task = self.tasks.remove(index);
        let restarted = match self.validator.validate(task.descriptor()) {
            Err(reason) => {
                info!(task_id = %id, reason = %reason, "Retry refused by validation");
                self.emit(UploadEvent::Rejected {
                    task_id: id.clone(),
                    reason: reason.to_string(),
                    at: Utc::now(),
                });
                task.reject(reason);
                false
            }
            Ok(()) => {
                info!(task_id = %id, "Retrying upload");
                self.start(&mut task);
                true
            }
        };
        self.tasks.insert(index, task);
        self.publish();
        restarted
    }

    fn start(&self, task: &mut Task) {
        let Some(handle) = task.begin_attempt(self.config.speed_window) else {
            return;
        };

        self.emit(UploadEvent::Started {
            task_id: handle.task_id.clone(),
            attempt: handle.attempt,
            at: Utc::now(),
        });

        tokio::spawn(run_attempt(
            handle,
            self.issuer.clone(),
            self.transport.clone(),
            self.reports.clone(),
        ));
    }

    fn handle_report(&mut self, report: Report) {
        let task_id = match &report {
            Report::DestinationAcquired { task_id, .. }
            | Report::Progress { task_id, .. }
            | Report::Completed { task_id, .. }
            | Report::Failed { task_id, .. } => task_id.clone(),
        };

        let interval = self.config.progress_interval;
        let Some(task) = self.tasks.iter_mut().find(|t| t.id() == &task_id) else {
            debug!(task_id = %task_id, "Report for removed task ignored");
            return;
        };

        let mut changed = false;
        let event = match report {
            Report::DestinationAcquired {
                attempt,
                storage_path,
                at,
                ..
            } => task
                .destination_acquired(attempt, storage_path.clone(), at)
                .then(|| UploadEvent::DestinationAcquired {
                    task_id,
                    storage_path,
                    at: Utc::now(),
                }),
            Report::Progress {
                attempt,
                bytes_so_far,
                total_bytes,
                at,
                ..
            } => match task.apply_progress(attempt, bytes_so_far, total_bytes, at, interval) {
                ProgressOutcome::Sampled => {
                    debug!(
                        task_id = %task_id,
                        percent = task.progress_percent(),
                        eta = ?task.eta_seconds(),
                        "Upload progress"
                    );
                    Some(UploadEvent::Progress {
                        percent: task.progress_percent(),
                        eta_seconds: task.eta_seconds(),
                        task_id,
                        at: Utc::now(),
                    })
                }
                // bytes moved, percent and eta wait for the next sample
                ProgressOutcome::Coalesced => {
                    changed = true;
                    None
                }
                ProgressOutcome::Ignored => None,
            },
            Report::Completed { attempt, .. } => task.complete(attempt).then(|| {
                info!(task_id = %task_id, storage_path = ?task.storage_path(), "Upload complete");
                UploadEvent::Completed {
                    storage_path: task.storage_path().map(str::to_string),
                    task_id,
                    at: Utc::now(),
                }
            }),
            Report::Failed {
                attempt,
                kind,
                reason,
                ..
            } => task
                .fail(attempt, kind, reason.clone())
                .then(|| UploadEvent::Failed {
                    task_id,
                    kind,
                    error: reason,
                    at: Utc::now(),
                }),
        };

        if let Some(event) = event {
            self.emit(event);
            changed = true;
        }
        if changed {
            self.publish();
        }
    }

    fn cancel_in_flight(&mut self) {
        let cancelled = self.tasks.iter_mut().map(Task::cancel).filter(|c| *c).count();
        if cancelled > 0 {
            info!(cancelled, "Cancelled in-flight uploads on shutdown");
        }
    }

    fn emit(&self, event: UploadEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        let snapshot = UploadSnapshot::new(self.tasks.iter().map(Task::snapshot).collect());
        self.state.send_replace(snapshot);
    }
}
