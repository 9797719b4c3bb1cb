use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Validation rule set consumed by the validator and the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadRules {
    /// Accepted extensions. The validator matches them as lowercase ".ext".
    pub allowed_extensions: Vec<String>,

    /// Expected declared content types. Mismatches only warn.
    pub allowed_content_types: Vec<String>,

    /// Largest accepted file
    pub max_file_size_bytes: u64,

    /// Task ceiling for one submission
    pub max_task_count: usize,
}

impl Default for UploadRules {
    fn default() -> Self {
        Self {
            allowed_extensions: [".mp3", ".wav", ".flac", ".m4a"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_content_types: [
                "audio/mpeg",
                "audio/wav",
                "audio/x-wav",
                "audio/flac",
                "audio/x-m4a",
                "audio/mp4",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_file_size_bytes: 50 * 1024 * 1024, // 50MB
            max_task_count: 5,
        }
    }
}

impl UploadRules {
    /// Create rules with the default audio policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the extension allow-list. Entries are normalized to ".ext".
    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|ext| normalize_extension(ext.as_ref()))
            .collect();
        self
    }

    /// Replace the expected content types
    pub fn with_allowed_content_types<I, S>(mut self, content_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_content_types = content_types.into_iter().map(Into::into).collect();
        self
    }

    /// Set max file size
    pub fn with_max_file_size_bytes(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = bytes;
        self
    }

    /// Set max file size in whole megabytes
    pub fn with_max_file_size_mb(mut self, mb: u64) -> Self {
        self.max_file_size_bytes = mb * 1024 * 1024;
        self
    }

    /// Set the task ceiling
    pub fn with_max_task_count(mut self, count: usize) -> Self {
        self.max_task_count = count;
        self
    }
}

pub(crate) fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

/// Configuration for the upload manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub rules: UploadRules,

    /// Minimum spacing between processed progress samples
    pub progress_interval: Duration,

    /// Throughput samples kept per task for the ETA average
    pub speed_window: usize,

    /// Buffer of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            rules: UploadRules::default(),
            progress_interval: Duration::from_millis(100),
            speed_window: 5,
            event_capacity: 256,
        }
    }
}

impl ManagerConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set validation rules
    pub fn with_rules(mut self, rules: UploadRules) -> Self {
        self.rules = rules;
        self
    }

    /// Set progress sampling interval
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set the number of throughput samples averaged for ETA
    pub fn with_speed_window(mut self, samples: usize) -> Self {
        self.speed_window = samples.max(1);
        self
    }

    /// Set event channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
