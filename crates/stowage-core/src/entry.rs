//! File and folder statistics.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::ids::EntryId;
use crate::path::FsPath;

/// Statistics of a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Stable identity of the file.
    pub id: EntryId,
    /// File name (last path component).
    pub name: CompactString,
    /// Absolute path inside the workspace.
    pub path: FsPath,
    /// Size in bytes.
    pub size: u64,
}

impl FileEntry {
    /// Create a file entry; the name is taken from the path.
    pub fn new(id: EntryId, path: FsPath, size: u64) -> Self {
        Self {
            id,
            name: CompactString::from(path.name().unwrap_or_default()),
            path,
            size,
        }
    }
}

/// Statistics of a single folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub id: EntryId,
    pub name: CompactString,
    pub path: FsPath,
}

impl FolderEntry {
    pub fn new(id: EntryId, path: FsPath) -> Self {
        Self {
            id,
            name: CompactString::from(path.name().unwrap_or_default()),
            path,
        }
    }
}

/// A file or a folder, as returned by a stat call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryStat {
    File(FileEntry),
    Folder(FolderEntry),
}

impl EntryStat {
    pub fn id(&self) -> EntryId {
        match self {
            Self::File(f) => f.id,
            Self::Folder(f) => f.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::File(f) => &f.name,
            Self::Folder(f) => &f.name,
        }
    }

    pub fn path(&self) -> &FsPath {
        match self {
            Self::File(f) => &f.path,
            Self::Folder(f) => &f.path,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Self::Folder(_))
    }

    /// Size in bytes; folders report 0 since their size needs a listing.
    pub fn size(&self) -> u64 {
        match self {
            Self::File(f) => f.size,
            Self::Folder(_) => 0,
        }
    }
}
