//! Collaborator traits the scheduler delegates I/O to.
//!
//! Nothing in this module performs I/O itself. A real deployment implements
//! these traits on top of its workspace client; [`crate::memory`] implements
//! them in memory.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use stowage_core::{
    DuplicatePolicy, EntryStat, EntryTree, FsPath, PointInTime, WorkspaceHandle, WorkspaceInfo,
};
use thiserror::Error;
use tokio::sync::mpsc;

/// Type alias for boxed futures returned by async collaborator methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type for collaborator calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Channel over which a delegate reports progress within one call.
pub type ProgressSender = mpsc::UnboundedSender<ProgressUpdate>;

/// Cumulative progress of a single delegate call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Bytes processed so far by this call.
    pub bytes: u64,
    /// Files completed so far by this call.
    pub files: u64,
}

impl ProgressUpdate {
    pub fn bytes(bytes: u64) -> Self {
        Self { bytes, files: 0 }
    }
}

/// Failures surfaced by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The target name is already taken.
    #[error("Entry already exists: {path}")]
    AlreadyExists { path: FsPath },

    /// The entry does not exist.
    #[error("Entry not found: {path}")]
    NotFound { path: FsPath },

    /// A folder was required.
    #[error("Not a folder: {path}")]
    NotAFolder { path: FsPath },

    /// A file was required.
    #[error("Not a file: {path}")]
    NotAFile { path: FsPath },

    /// The workspace handle no longer resolves.
    #[error("Workspace {handle} is not available")]
    WorkspaceUnavailable { handle: WorkspaceHandle },

    /// Stream or storage I/O failed.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl BackendError {
    pub fn io(error: impl fmt::Display) -> Self {
        Self::Io {
            message: error.to_string(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// Resolves workspace handles.
pub trait WorkspaceProvider: Send + Sync {
    /// Identity and display name of the workspace behind `handle`.
    fn info(&self, handle: WorkspaceHandle) -> BoxFuture<'_, BackendResult<WorkspaceInfo>>;

    /// The workspace behind `handle`.
    fn workspace(&self, handle: WorkspaceHandle) -> BoxFuture<'_, BackendResult<Arc<dyn Workspace>>>;
}

/// The filesystem API of one workspace.
pub trait Workspace: Send + Sync {
    /// Current identity and display name.
    fn info(&self) -> WorkspaceInfo;

    /// Create a folder whose parent exists. Fails with
    /// [`BackendError::AlreadyExists`] when the name is taken.
    fn create_folder<'a>(&'a self, path: &'a FsPath) -> BoxFuture<'a, BackendResult<()>>;

    /// Rename or move an entry, replacing an existing target when `overwrite`.
    fn rename<'a>(
        &'a self,
        src: &'a FsPath,
        dst: &'a FsPath,
        overwrite: bool,
    ) -> BoxFuture<'a, BackendResult<()>>;

    /// Move `src` to `dst`, picking a counter name when `dst` is taken.
    /// Returns the path the entry ended up at.
    fn move_with_counter<'a>(
        &'a self,
        src: &'a FsPath,
        dst: &'a FsPath,
    ) -> BoxFuture<'a, BackendResult<FsPath>>;

    fn stat<'a>(&'a self, path: &'a FsPath) -> BoxFuture<'a, BackendResult<EntryStat>>;

    /// Recursively list `path`, setting the saturation flags when a listing
    /// ceiling was hit.
    fn list_tree<'a>(&'a self, path: &'a FsPath) -> BoxFuture<'a, BackendResult<EntryTree>>;

    /// Open a file for reading, at `at` when given.
    fn open_read<'a>(
        &'a self,
        path: &'a FsPath,
        at: Option<PointInTime>,
    ) -> BoxFuture<'a, BackendResult<Box<dyn ReadStream>>>;

    /// Write the content of an external file to `temp`.
    fn import_file<'a>(
        &'a self,
        reader: Box<dyn ReadStream>,
        temp: &'a FsPath,
        progress: ProgressSender,
    ) -> BoxFuture<'a, BackendResult<()>>;

    /// Copy a single file to `temp`.
    fn copy_file<'a>(&'a self, src: &'a FsPath, temp: &'a FsPath)
    -> BoxFuture<'a, BackendResult<()>>;

    /// Recursively copy a folder to `temp`.
    fn copy_folder<'a>(
        &'a self,
        src: &'a FsPath,
        temp: &'a FsPath,
        progress: ProgressSender,
    ) -> BoxFuture<'a, BackendResult<()>>;

    /// Start a new, empty staging transaction.
    fn transaction(&self) -> Box<dyn StagingTransaction>;

    /// Create a read-only history session; it must be started before use.
    fn history(&self) -> Box<dyn HistorySession>;
}

/// Stages entries under temporary names and exposes them under their final
/// names in a single commit.
pub trait StagingTransaction: Send + Sync {
    /// Associate a staged temporary entry with its final path.
    fn add_file(&mut self, temp: FsPath, target: FsPath);

    /// Move every staged entry to its final path, resolving name collisions
    /// with `policy`.
    fn commit(&mut self, policy: DuplicatePolicy) -> BoxFuture<'_, BackendResult<()>>;

    /// Delete every staged temporary entry.
    fn clear(&mut self) -> BoxFuture<'_, BackendResult<()>>;

    /// Number of staged associations.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-only view of a workspace at a past point in time.
pub trait HistorySession: Send + Sync {
    fn start(&mut self, at: PointInTime) -> BoxFuture<'_, BackendResult<()>>;

    fn entry_stat<'a>(&'a self, path: &'a FsPath) -> BoxFuture<'a, BackendResult<EntryStat>>;

    fn list_tree<'a>(&'a self, path: &'a FsPath) -> BoxFuture<'a, BackendResult<EntryTree>>;

    /// Write the past content of `src` into the live workspace at `temp`.
    fn restore_file<'a>(
        &'a self,
        src: &'a FsPath,
        temp: &'a FsPath,
        progress: ProgressSender,
    ) -> BoxFuture<'a, BackendResult<()>>;

    fn stop(&mut self) -> BoxFuture<'_, BackendResult<()>>;
}

/// A chunked byte source.
pub trait ReadStream: Send {
    /// Read up to `max_len` bytes; `None` at end of stream.
    fn read_chunk(&mut self, max_len: usize) -> BoxFuture<'_, BackendResult<Option<Vec<u8>>>>;
}

/// A byte sink that must be either closed or aborted.
pub trait WriteStream: Send {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, BackendResult<()>>;

    /// Flush and finish the stream.
    fn close(&mut self) -> BoxFuture<'_, BackendResult<()>>;

    /// Stop writing without finishing.
    fn abort(&mut self) -> BoxFuture<'_, BackendResult<()>>;
}

/// Where a download is written.
pub trait Destination: Send + Sync + fmt::Debug {
    /// Human-readable name of the destination.
    fn name(&self) -> String;

    fn open(&self) -> BoxFuture<'_, BackendResult<Box<dyn WriteStream>>>;

    /// Delete whatever was written to the destination.
    fn remove(&self) -> BoxFuture<'_, BackendResult<()>>;
}

/// A file outside the workspace, to be imported.
pub trait ExternalFile: Send + Sync + fmt::Debug {
    fn open(&self) -> BoxFuture<'_, BackendResult<Box<dyn ReadStream>>>;
}
