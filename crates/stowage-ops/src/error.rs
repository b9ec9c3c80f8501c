//! Error types for operations.

use std::fmt;

use serde::{Deserialize, Serialize};
use stowage_core::{FsPath, PathError, TreeLimit, WorkspaceHandle};
use strum::{AsRefStr, Display};
use thiserror::Error;

use crate::backend::BackendError;

/// Result type for job runners.
pub type OperationResult<T> = Result<T, OperationError>;

/// Errors that end an operation.
#[derive(Debug, Error)]
pub enum OperationError {
    /// A checkpoint observed the cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// A recursive listing stopped at its depth ceiling.
    #[error("Folder nesting too deep below {path}")]
    RecursionLimit { path: FsPath },

    /// A recursive listing stopped at its file-count ceiling.
    #[error("Too many files below {path}")]
    FileCountLimit { path: FsPath },

    /// The workspace could not be resolved when the job started.
    #[error("Workspace {handle} is not available: {source}")]
    WorkspaceUnavailable {
        handle: WorkspaceHandle,
        #[source]
        source: BackendError,
    },

    /// A collaborator call failed.
    #[error("Failed to {action} {path}: {source}")]
    Delegate {
        action: &'static str,
        path: FsPath,
        #[source]
        source: BackendError,
    },

    /// A source or target path could not be built.
    #[error("Invalid path: {source}")]
    InvalidPath {
        #[from]
        source: PathError,
    },

    /// Anything else, including a panic inside the job.
    #[error("Unexpected failure: {message}")]
    Unhandled { message: String },
}

/// The error taxonomy exposed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Cancelled,
    RecursionLimit,
    FileCountLimit,
    Delegate,
    InvalidInput,
    Unhandled,
}

impl OperationError {
    /// Wrap a collaborator failure; meant for `map_err`.
    pub(crate) fn delegate(
        action: &'static str,
        path: &FsPath,
    ) -> impl FnOnce(BackendError) -> Self + use<> {
        let path = path.clone();
        move |source| Self::Delegate {
            action,
            path,
            source,
        }
    }

    pub(crate) fn limit(limit: TreeLimit, path: &FsPath) -> Self {
        let path = path.clone();
        match limit {
            TreeLimit::Recursion => Self::RecursionLimit { path },
            TreeLimit::FileCount => Self::FileCountLimit { path },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::RecursionLimit { .. } => ErrorKind::RecursionLimit,
            Self::FileCountLimit { .. } => ErrorKind::FileCountLimit,
            Self::WorkspaceUnavailable { .. } | Self::Delegate { .. } => ErrorKind::Delegate,
            Self::InvalidPath { .. } => ErrorKind::InvalidInput,
            Self::Unhandled { .. } => ErrorKind::Unhandled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The workspace path the failure relates to, if any.
    pub fn path(&self) -> Option<&FsPath> {
        match self {
            Self::RecursionLimit { path }
            | Self::FileCountLimit { path }
            | Self::Delegate { path, .. } => Some(path),
            _ => None,
        }
    }

    /// The structured payload published with a `Failed` event.
    pub fn failure(&self) -> FailureInfo {
        FailureInfo {
            kind: self.kind(),
            message: self.to_string(),
            path: self.path().cloned(),
        }
    }
}

/// Structured description of a failed operation, one per notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: ErrorKind,
    /// Human-readable message, including the delegate's own description.
    pub message: String,
    pub path: Option<FsPath>,
}

impl fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delegate_error_keeps_detail() {
        let path = FsPath::parse("/docs").unwrap();
        let err = OperationError::delegate("create folder", &path)(BackendError::io("disk full"));
        assert_eq!(err.kind(), ErrorKind::Delegate);
        let info = err.failure();
        assert_eq!(info.path, Some(path));
        assert!(info.message.contains("create folder"));
        assert!(info.message.contains("disk full"));
    }

    #[test]
    fn test_limit_mapping() {
        let path = FsPath::root();
        assert_eq!(
            OperationError::limit(TreeLimit::Recursion, &path).kind(),
            ErrorKind::RecursionLimit
        );
        assert_eq!(
            OperationError::limit(TreeLimit::FileCount, &path).kind(),
            ErrorKind::FileCountLimit
        );
    }

    #[test]
    fn test_cancelled_is_distinguishable() {
        assert!(OperationError::Cancelled.is_cancelled());
        assert!(
            !OperationError::Unhandled {
                message: "boom".into()
            }
            .is_cancelled()
        );
    }

    #[test]
    fn test_failure_info_serializes_kind() {
        let info = OperationError::Unhandled {
            message: "boom".into(),
        }
        .failure();
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"kind\":\"unhandled\""));
        assert_eq!(info.to_string(), "[unhandled] Unexpected failure: boom");
    }
}
