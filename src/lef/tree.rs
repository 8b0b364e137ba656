//! Arena-backed LEF record tree: `Vec<Node>` with children referring to
//! parents by index, rather than a graph of owned pointers needing a
//! manual free pass on close.

use super::record::{FileEntry, FileSource, Permission};

pub type NodeIndex = usize;

/// What kind of record a tree node wraps, and the index of that record in
/// its owning dense vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Source(usize),
    Permission(usize),
    FileEntry(usize),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
}

/// The whole decoded LEF payload: three owning vectors of typed records,
/// plus the tree overlay connecting them. Built once during open; read-only
/// thereafter.
#[derive(Debug, Default)]
pub struct LefTree {
    pub sources: Vec<FileSource>,
    pub permissions: Vec<Permission>,
    pub file_entries: Vec<FileEntry>,
    pub nodes: Vec<Node>,
    pub root: NodeIndex,
}

impl LefTree {
    pub fn new() -> Self {
        LefTree {
            sources: Vec::new(),
            permissions: Vec::new(),
            file_entries: Vec::new(),
            nodes: vec![Node {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
            }],
            root: 0,
        }
    }

    pub fn add_child(&mut self, parent: NodeIndex, kind: NodeKind) -> NodeIndex {
        let index = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(index);
        index
    }

    pub fn push_source(&mut self, parent: NodeIndex, source: FileSource) -> NodeIndex {
        let record_index = self.sources.len();
        self.sources.push(source);
        self.add_child(parent, NodeKind::Source(record_index))
    }

    pub fn push_permission(&mut self, parent: NodeIndex, permission: Permission) -> NodeIndex {
        let record_index = self.permissions.len();
        self.permissions.push(permission);
        self.add_child(parent, NodeKind::Permission(record_index))
    }

    pub fn push_file_entry(&mut self, parent: NodeIndex, entry: FileEntry) -> NodeIndex {
        let record_index = self.file_entries.len();
        self.file_entries.push(entry);
        self.add_child(parent, NodeKind::FileEntry(record_index))
    }

    pub fn children(&self, node: NodeIndex) -> &[NodeIndex] {
        &self.nodes[node].children
    }

    pub fn source(&self, node: NodeIndex) -> Option<&FileSource> {
        match self.nodes.get(node)?.kind {
            NodeKind::Source(i) => self.sources.get(i),
            _ => None,
        }
    }

    pub fn permission(&self, node: NodeIndex) -> Option<&Permission> {
        match self.nodes.get(node)?.kind {
            NodeKind::Permission(i) => self.permissions.get(i),
            _ => None,
        }
    }

    pub fn file_entry(&self, node: NodeIndex) -> Option<&FileEntry> {
        match self.nodes.get(node)?.kind {
            NodeKind::FileEntry(i) => self.file_entries.get(i),
            _ => None,
        }
    }

    /// Finds a `source` node by its `file_source.id`, mirroring
    /// `libewf_file_source_get_sub_file_source_by_id`.
    pub fn find_source_by_id(&self, id: u32) -> Option<&FileSource> {
        self.sources.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_nest_under_correct_parent() {
        let mut tree = LefTree::new();
        let source_node = tree.push_source(tree.root, FileSource::default());
        let perm_node = tree.push_permission(source_node, Permission::default());
        assert_eq!(tree.children(tree.root), &[source_node]);
        assert_eq!(tree.children(source_node), &[perm_node]);
        assert!(tree.permission(perm_node).is_some());
    }

    #[test]
    fn find_source_by_id_locates_record() {
        let mut tree = LefTree::new();
        tree.push_source(
            tree.root,
            FileSource {
                id: 7,
                ..Default::default()
            },
        );
        assert!(tree.find_source_by_id(7).is_some());
        assert!(tree.find_source_by_id(8).is_none());
    }
}
