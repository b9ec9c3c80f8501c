//! Absolute, `/`-separated paths inside a workspace.

use std::fmt;
use std::str::FromStr;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::PathError;

/// An absolute path inside a workspace.
///
/// Paths are stored as their components, so ordering is component-wise and
/// every descendant of a folder sorts directly after it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FsPath {
    parts: Vec<CompactString>,
}

impl FsPath {
    /// The workspace root, `/`.
    pub fn root() -> Self {
        Self { parts: Vec::new() }
    }

    /// Parse an absolute path. Empty and `.` components are dropped.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if !raw.starts_with('/') {
            return Err(PathError::NotAbsolute {
                path: raw.to_string(),
            });
        }
        Self::root().join_relative(raw)
    }

    /// Append a single entry name.
    pub fn join(&self, name: &str) -> Result<Self, PathError> {
        validate_name(name)?;
        let mut parts = self.parts.clone();
        parts.push(CompactString::from(name));
        Ok(Self { parts })
    }

    /// Append a `/`-separated relative path such as `photos/2024/a.jpg`.
    pub fn join_relative(&self, relative: &str) -> Result<Self, PathError> {
        let mut parts = self.parts.clone();
        for part in relative.split('/') {
            match part {
                "" | "." => continue,
                ".." => {
                    return Err(PathError::ParentReference {
                        path: relative.to_string(),
                    });
                }
                name => parts.push(CompactString::from(name)),
            }
        }
        Ok(Self { parts })
    }

    /// The parent folder, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.parts.is_empty() {
            return None;
        }
        Some(Self {
            parts: self.parts[..self.parts.len() - 1].to_vec(),
        })
    }

    /// The last component, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.parts.last().map(|p| p.as_str())
    }

    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    /// Number of components below the root.
    pub fn depth(&self) -> usize {
        self.parts.len()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.as_str())
    }

    /// True when `self` equals `ancestor` or lies below it.
    pub fn starts_with(&self, ancestor: &FsPath) -> bool {
        self.parts.starts_with(&ancestor.parts)
    }

    /// The `/`-joined path of `self` below `root`, or `None` when `self` is
    /// not strictly inside `root`.
    pub fn relative_to(&self, root: &FsPath) -> Option<String> {
        if self.parts.len() <= root.parts.len() || !self.starts_with(root) {
            return None;
        }
        Some(self.parts[root.parts.len()..].join("/"))
    }

    /// Re-root `self` from `from` onto `to`. `self` must start with `from`.
    pub fn rebase(&self, from: &FsPath, to: &FsPath) -> Option<Self> {
        if !self.starts_with(from) {
            return None;
        }
        let mut parts = to.parts.clone();
        parts.extend(self.parts[from.parts.len()..].iter().cloned());
        Some(Self { parts })
    }

    /// Every ancestor from the first component down to `self`, root excluded.
    pub fn ancestors_inclusive(&self) -> impl Iterator<Item = FsPath> + '_ {
        (1..=self.parts.len()).map(|len| Self {
            parts: self.parts[..len].to_vec(),
        })
    }
}

fn validate_name(name: &str) -> Result<(), PathError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(PathError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            return f.write_str("/");
        }
        for part in &self.parts {
            write!(f, "/{part}")?;
        }
        Ok(())
    }
}

impl FromStr for FsPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FsPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FsPath> for String {
    fn from(value: FsPath) -> Self {
        value.to_string()
    }
}
