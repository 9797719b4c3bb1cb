use crate::{TaskId, TaskStatus, TransferTask};

/// Point-in-time view of every task, in insertion order.
///
/// Aggregate flags are derived on demand and never stored.
#[derive(Debug, Clone, Default)]
pub struct UploadSnapshot {
    pub tasks: Vec<TransferTask>,
}

impl UploadSnapshot {
    pub fn new(tasks: Vec<TransferTask>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &TaskId) -> Option<&TransferTask> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Any task in `Uploading`
    pub fn is_uploading(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Uploading)
    }

    /// Any task in `Error`
    pub fn has_errors(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Error)
    }

    /// Non-empty and every task `Complete`
    pub fn all_complete(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| t.status == TaskStatus::Complete)
    }

    pub fn completed_tasks(&self) -> Vec<&TransferTask> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Complete)
            .collect()
    }

    /// Unweighted mean of per-task percentages, rounded. 0 when empty.
    pub fn overall_progress_percent(&self) -> u8 {
        if self.tasks.is_empty() {
            return 0;
        }
        let sum: u64 = self.tasks.iter().map(|t| u64::from(t.progress_percent)).sum();
        (sum as f64 / self.tasks.len() as f64).round() as u8
    }

    /// Progress weighted by file size. Large files count proportionally.
    pub fn bytes_weighted_progress_percent(&self) -> u8 {
        let total: u64 = self.tasks.iter().map(|t| t.descriptor.size).sum();
        if total == 0 {
            return 0;
        }
        let done: u64 = self
            .tasks
            .iter()
            .map(|t| t.bytes_transferred.min(t.descriptor.size))
            .sum();
        ((done as f64 / total as f64) * 100.0).round() as u8
    }

    pub fn total_bytes_transferred(&self) -> u64 {
        self.tasks.iter().map(|t| t.bytes_transferred).sum()
    }
}
