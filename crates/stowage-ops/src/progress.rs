//! Progress reporting types for operations.

use serde::{Deserialize, Serialize};

/// Percentage of `done` over `total`, clamped to 0..=100.
///
/// A total of zero reports 100.
pub fn percentage(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let ratio = done.min(total) as f64 / total as f64;
    (ratio * 100.0).round() as u8
}

/// Progress of the file currently being processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProgress {
    pub name: String,
    pub done: u64,
    pub total: u64,
    pub percent: u8,
}

/// Progress of the whole operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalProgress {
    /// Aggregate bytes processed so far.
    pub done: u64,
    /// Aggregate bytes to process.
    pub total: u64,
    /// Number of files in the operation.
    pub file_count: usize,
    /// Zero-based index of the file currently being processed.
    pub current_file: usize,
    pub percent: u8,
}

/// Payload of a `Progress` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationProgress {
    pub file: FileProgress,
    pub global: GlobalProgress,
}

/// Aggregates per-file progress into operation-wide figures.
///
/// Global bytes never go backwards, even when a delegate reports less than
/// it did before.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    file_count: usize,
    total_bytes: u64,
    completed_files: usize,
    completed_bytes: u64,
    reported_bytes: u64,
}

impl ProgressTracker {
    pub fn new(file_count: usize, total_bytes: u64) -> Self {
        Self {
            file_count,
            total_bytes,
            completed_files: 0,
            completed_bytes: 0,
            reported_bytes: 0,
        }
    }

    /// Snapshot while `done` of `total` bytes of the current unit are done.
    pub fn progress(&mut self, name: &str, done: u64, total: u64) -> OperationProgress {
        self.progress_files(name, done, total, 0)
    }

    /// Like [`progress`](Self::progress), for a unit spanning several files
    /// of which `files_done` are complete.
    pub fn progress_files(
        &mut self,
        name: &str,
        done: u64,
        total: u64,
        files_done: usize,
    ) -> OperationProgress {
        let global_done = (self.completed_bytes + done.min(total)).max(self.reported_bytes);
        self.reported_bytes = global_done;

        let current_file = (self.completed_files + files_done)
            .min(self.file_count.saturating_sub(1));

        OperationProgress {
            file: FileProgress {
                name: name.to_string(),
                done: done.min(total),
                total,
                percent: percentage(done, total),
            },
            global: GlobalProgress {
                done: global_done,
                total: self.total_bytes,
                file_count: self.file_count,
                current_file,
                percent: percentage(global_done, self.total_bytes),
            },
        }
    }

    /// Mark a unit of `files` files and `bytes` bytes as done.
    pub fn complete(&mut self, files: usize, bytes: u64) {
        self.completed_files += files;
        self.completed_bytes += bytes;
    }
}
