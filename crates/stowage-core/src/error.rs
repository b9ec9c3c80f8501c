//! Error types for core data.

use thiserror::Error;

/// Errors raised while parsing or extending a workspace path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// Workspace paths are always absolute.
    #[error("Path must start with '/': {path}")]
    NotAbsolute { path: String },

    /// A component tried to escape its parent.
    #[error("Parent references are not allowed: {path}")]
    ParentReference { path: String },

    /// A single entry name contained a separator or was empty.
    #[error("Invalid entry name: {name:?}")]
    InvalidName { name: String },
}
