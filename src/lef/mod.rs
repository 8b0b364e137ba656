//! Logical Evidence Format (LEF) record decoder: `single_files`/`ltree`
//! payload → typed record tree.
//!
//! [`LogicalTree`] wraps a [`LefTree`] behind an `RwLock` and exposes it
//! through `with_read_lock`, so every public getter acquires the tree's
//! shared lock for reading rather than locking per field.

mod parser;
mod record;
mod tokenize;
mod tree;

pub use record::{FileEntry, FileSource, Permission, SerializedString};
pub use tree::{LefTree, Node, NodeIndex, NodeKind};

use crate::error::Result;
use std::sync::RwLock;

/// Owns a decoded [`LefTree`] behind a reader-writer lock so a `Handle` can
/// be shared across threads without cloning the tree.
pub struct LogicalTree {
    inner: RwLock<LefTree>,
}

impl LogicalTree {
    /// Parses `raw` (the concatenated `single_files`/`ltree` section
    /// payload) into a fresh, lock-guarded tree.
    pub fn parse(raw: &[u8]) -> Result<LogicalTree> {
        let tree = parser::parse_ltree(raw)?;
        Ok(LogicalTree {
            inner: RwLock::new(tree),
        })
    }

    pub fn empty() -> LogicalTree {
        LogicalTree {
            inner: RwLock::new(LefTree::new()),
        }
    }

    /// Runs `f` against the tree under a shared read lock. All read-only
    /// accessors on `LogicalTree` are built on top of this one primitive
    /// rather than each acquiring the lock separately.
    pub fn with_read_lock<T>(&self, f: impl FnOnce(&LefTree) -> T) -> T {
        let guard = self.inner.read().expect("LEF tree lock poisoned");
        f(&guard)
    }

    pub fn source_count(&self) -> usize {
        self.with_read_lock(|tree| tree.sources.len())
    }

    pub fn permission_count(&self) -> usize {
        self.with_read_lock(|tree| tree.permissions.len())
    }

    pub fn file_entry_count(&self) -> usize {
        self.with_read_lock(|tree| tree.file_entries.len())
    }

    pub fn find_source_by_id(&self, id: u32) -> Option<FileSource> {
        self.with_read_lock(|tree| tree.find_source_by_id(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(text: &str) -> Vec<u8> {
        let mut bytes: Vec<u8> = vec![0xFF, 0xFE];
        bytes.extend(text.encode_utf16().flat_map(|c| c.to_le_bytes()));
        bytes
    }

    #[test]
    fn parses_and_counts_records_under_lock() {
        let payload = utf16le("source\n1\nn\tsn\nDrive C\tABC123\n");
        let tree = LogicalTree::parse(&payload).unwrap();
        assert_eq!(tree.source_count(), 1);
        assert_eq!(tree.permission_count(), 0);
        assert!(tree.find_source_by_id(0).is_some());
    }

    #[test]
    fn empty_tree_has_no_records() {
        let tree = LogicalTree::empty();
        assert_eq!(tree.source_count(), 0);
        assert_eq!(tree.file_entry_count(), 0);
    }
}
