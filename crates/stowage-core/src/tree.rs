//! Flattened entry trees produced by recursive listings.

use serde::{Deserialize, Serialize};

use crate::entry::FileEntry;

/// Which listing ceiling a tree hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeLimit {
    /// The lister stopped descending at its maximum depth.
    Recursion,
    /// The lister stopped after its maximum number of files.
    FileCount,
}

/// The flattened result of recursively listing an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryTree {
    /// Every file below the listed entry, in listing order.
    pub files: Vec<FileEntry>,
    /// Sum of the sizes of `files`.
    pub total_size: u64,
    /// The lister hit its depth ceiling; `files` is incomplete.
    pub max_recursion_reached: bool,
    /// The lister hit its file-count ceiling; `files` is incomplete.
    pub max_files_reached: bool,
}

impl EntryTree {
    /// Create a complete tree from a list of files.
    pub fn new(files: Vec<FileEntry>) -> Self {
        let total_size = files.iter().map(|f| f.size).sum();
        Self {
            files,
            total_size,
            max_recursion_reached: false,
            max_files_reached: false,
        }
    }

    /// A tree holding exactly one file.
    pub fn single(file: FileEntry) -> Self {
        Self::new(vec![file])
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The ceiling the lister hit, if any. Recursion takes precedence.
    pub fn limit(&self) -> Option<TreeLimit> {
        if self.max_recursion_reached {
            Some(TreeLimit::Recursion)
        } else if self.max_files_reached {
            Some(TreeLimit::FileCount)
        } else {
            None
        }
    }
}

/// Total file count and byte size across several trees.
pub fn tree_totals<'a>(trees: impl IntoIterator<Item = &'a EntryTree>) -> (usize, u64) {
    trees.into_iter().fold((0, 0), |(files, bytes), tree| {
        (files + tree.file_count(), bytes + tree.total_size)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntryId, FsPath};

    fn file(path: &str, size: u64) -> FileEntry {
        FileEntry::new(EntryId::new(), FsPath::parse(path).unwrap(), size)
    }

    #[test]
    fn test_tree_totals() {
        let a = EntryTree::new(vec![file("/a/1", 10), file("/a/2", 5)]);
        let b = EntryTree::single(file("/b", 7));
        assert_eq!(a.total_size, 15);
        assert_eq!(tree_totals([&a, &b]), (3, 22));
        assert_eq!(tree_totals(&Vec::<EntryTree>::new()), (0, 0));
    }

    #[test]
    fn test_tree_limit() {
        let mut tree = EntryTree::default();
        assert_eq!(tree.limit(), None);
        tree.max_files_reached = true;
        assert_eq!(tree.limit(), Some(TreeLimit::FileCount));
        tree.max_recursion_reached = true;
        assert_eq!(tree.limit(), Some(TreeLimit::Recursion));
    }
}
