//! Operation descriptors.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowage_core::{
    DuplicatePolicy, EntryStat, EntryTree, FileEntry, FsPath, OperationId, PointInTime,
    WorkspaceHandle, WorkspaceId, WorkspaceInfo, tree_totals,
};

use crate::backend::{Destination, ExternalFile};

/// The kind of operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Import,
    Move,
    Copy,
    Restore,
    Download,
    DownloadArchive,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Import => write!(f, "Import"),
            Self::Move => write!(f, "Move"),
            Self::Copy => write!(f, "Copy"),
            Self::Restore => write!(f, "Restore"),
            Self::Download => write!(f, "Download"),
            Self::DownloadArchive => write!(f, "Download archive"),
        }
    }
}

/// One external file to import.
#[derive(Debug, Clone)]
pub struct ImportSource {
    /// `/`-separated path relative to the import destination, including the
    /// file name ("photos/2024/a.jpg").
    pub relative_path: String,
    /// Size in bytes, used for aggregate progress.
    pub size: u64,
    pub file: Arc<dyn ExternalFile>,
}

impl ImportSource {
    pub fn new(relative_path: impl Into<String>, size: u64, file: Arc<dyn ExternalFile>) -> Self {
        Self {
            relative_path: relative_path.into(),
            size,
            file,
        }
    }
}

/// Import external files below a destination folder.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub sources: Vec<ImportSource>,
    pub destination: FsPath,
    pub policy: DuplicatePolicy,
}

/// Copy or move workspace entries into a destination folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub sources: Vec<EntryStat>,
    pub destination: FsPath,
    pub policy: DuplicatePolicy,
}

/// Restore entries to their content at a past point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub entries: Vec<EntryStat>,
    pub at: PointInTime,
    pub policy: DuplicatePolicy,
}

/// Download one file, optionally a past revision of it.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub entry: FileEntry,
    pub destination: Arc<dyn Destination>,
    pub at: Option<PointInTime>,
}

/// Download several entry trees as one zip archive.
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub trees: Vec<EntryTree>,
    pub destination: Arc<dyn Destination>,
    /// Archive names are computed relative to this folder.
    pub root: FsPath,
    pub total_files: usize,
    pub total_size: u64,
}

impl ArchiveRequest {
    /// Build a request, computing the totals from the trees.
    pub fn new(trees: Vec<EntryTree>, destination: Arc<dyn Destination>, root: FsPath) -> Self {
        let (total_files, total_size) = tree_totals(&trees);
        Self {
            trees,
            destination,
            root,
            total_files,
            total_size,
        }
    }
}

/// Kind-specific payload of an operation.
#[derive(Debug, Clone)]
pub enum OperationKind {
    Import(ImportRequest),
    Move(TransferRequest),
    Copy(TransferRequest),
    Restore(RestoreRequest),
    Download(DownloadRequest),
    DownloadArchive(ArchiveRequest),
}

impl OperationKind {
    pub fn operation_type(&self) -> OperationType {
        match self {
            Self::Import(_) => OperationType::Import,
            Self::Move(_) => OperationType::Move,
            Self::Copy(_) => OperationType::Copy,
            Self::Restore(_) => OperationType::Restore,
            Self::Download(_) => OperationType::Download,
            Self::DownloadArchive(_) => OperationType::DownloadArchive,
        }
    }
}

/// An operation as submitted to the scheduler.
///
/// The workspace name and identity are captured at submission; renaming the
/// workspace afterwards does not change what the operation reports.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: OperationId,
    pub workspace: WorkspaceHandle,
    pub workspace_id: WorkspaceId,
    pub workspace_name: String,
    pub submitted_at: DateTime<Utc>,
    pub kind: OperationKind,
}

impl Operation {
    /// Create a descriptor with a fresh identifier.
    pub fn new(workspace: WorkspaceHandle, info: WorkspaceInfo, kind: OperationKind) -> Self {
        Self {
            id: OperationId::new(),
            workspace,
            workspace_id: info.id,
            workspace_name: info.name,
            submitted_at: Utc::now(),
            kind,
        }
    }

    pub fn operation_type(&self) -> OperationType {
        self.kind.operation_type()
    }

    /// Short description for notifications, e.g. "Copy 3 items".
    pub fn summary(&self) -> String {
        let count = match &self.kind {
            OperationKind::Import(r) => r.sources.len(),
            OperationKind::Move(r) | OperationKind::Copy(r) => r.sources.len(),
            OperationKind::Restore(r) => r.entries.len(),
            OperationKind::Download(r) => return format!("Download {}", r.entry.name),
            OperationKind::DownloadArchive(r) => r.total_files,
        };
        let noun = if count == 1 { "item" } else { "items" };
        format!("{} {} {}", self.operation_type(), count, noun)
    }
}
