//! Core types for stowage.
//!
//! This crate provides the plain data shared by the scheduler and its
//! collaborators: identifiers, workspace paths, entry statistics, entry
//! trees, duplicate policies, and scheduler configuration.

mod config;
mod entry;
mod error;
mod ids;
mod path;
mod policy;
mod tree;

pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use entry::{EntryStat, FileEntry, FolderEntry};
pub use error::PathError;
pub use ids::{EntryId, OperationId, WorkspaceHandle, WorkspaceId, WorkspaceInfo};
pub use path::FsPath;
pub use policy::{DuplicatePolicy, counter_name, next_free_name};
pub use tree::{EntryTree, TreeLimit, tree_totals};

/// A point in time used to address past revisions of a workspace.
pub type PointInTime = chrono::DateTime<chrono::Utc>;
