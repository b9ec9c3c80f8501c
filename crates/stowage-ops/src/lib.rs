//! Operation scheduler for stowage.
//!
//! This crate sequences and supervises long-running bulk operations (import,
//! copy, move, restore, download, archive download) against a workspace.
//! Operations are queued in submission order, run with bounded concurrency,
//! and report their lifecycle through an [`EventDistributor`].
//!
//! The workspace itself is reached through the collaborator traits in
//! [`backend`]; [`memory`] provides an in-memory implementation of all of
//! them.

mod archive;
pub mod backend;
mod copy;
mod download;
mod download_archive;
mod error;
mod event;
mod import;
mod job;
mod local;
pub mod memory;
mod move_op;
mod operation;
mod progress;
mod restore;
mod scheduler;
mod staging;

pub use archive::ZipArchiveWriter;
pub use backend::{
    BackendError, BackendResult, BoxFuture, Destination, ExternalFile, HistorySession,
    ProgressSender, ProgressUpdate, ReadStream, StagingTransaction, Workspace, WorkspaceProvider,
    WriteStream,
};
pub use error::{ErrorKind, FailureInfo, OperationError, OperationResult};
pub use event::{EventCallback, EventDistributor, EventKind, OperationEvent, SubscriptionId};
pub use local::{LocalFile, LocalFileDestination};
pub use operation::{
    ArchiveRequest, DownloadRequest, ImportRequest, ImportSource, Operation, OperationKind,
    OperationType, RestoreRequest, TransferRequest,
};
pub use progress::{FileProgress, GlobalProgress, OperationProgress, percentage};
pub use scheduler::{OperationStatus, Scheduler};
