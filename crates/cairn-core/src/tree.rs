use serde::{Deserialize, Serialize};

use cairn_types::error::{CairnError, Result};

use crate::node::Node;

/// An ordered set of nodes, stored as one tree blob.
///
/// Nodes are kept strictly ascending by name under bytewise comparison;
/// names are unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn new() -> Self {
        Tree::default()
    }

    /// Insert `node` at its sorted position. Duplicate names are rejected.
    pub fn insert(&mut self, node: Node) -> Result<()> {
        match self
            .nodes
            .binary_search_by(|n| n.name.as_str().cmp(node.name.as_str()))
        {
            Ok(_) => Err(CairnError::DuplicateNode(node.name)),
            Err(pos) => {
                self.nodes.insert(pos, node);
                Ok(())
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<&Node> {
        self.nodes
            .binary_search_by(|n| n.name.as_str().cmp(name))
            .ok()
            .map(|pos| &self.nodes[pos])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Canonical encoding: the JSON object followed by a single newline.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Tree> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileKind, Metadata};

    fn test_node(name: &str) -> Node {
        let meta = Metadata {
            kind: FileKind::File,
            mode: 0o644,
            uid: 0,
            gid: 0,
            size: 1,
            stat_size: 1,
            mtime_ns: 1,
            ctime_ns: 1,
            atime_ns: 1,
            inode: 1,
            device: 1,
        };
        Node::from_metadata(name, &meta, false).unwrap()
    }

    #[test]
    fn insert_keeps_names_sorted() {
        let mut tree = Tree::new();
        for name in ["zeta", "alpha", "mid"] {
            tree.insert(test_node(name)).unwrap();
        }
        let names: Vec<&str> = tree.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn insert_rejects_duplicate_names() {
        let mut tree = Tree::new();
        tree.insert(test_node("a")).unwrap();
        let err = tree.insert(test_node("a")).unwrap_err();
        assert!(matches!(err, CairnError::DuplicateNode(name) if name == "a"));
    }

    #[test]
    fn find_by_name() {
        let mut tree = Tree::new();
        for name in ["a", "b", "c"] {
            tree.insert(test_node(name)).unwrap();
        }
        assert_eq!(tree.find("b").map(|n| n.name.as_str()), Some("b"));
        assert!(tree.find("missing").is_none());
    }

    #[test]
    fn ordering_is_bytewise() {
        let mut tree = Tree::new();
        // 'Z' (0x5a) sorts before 'a' (0x61) under byte comparison.
        tree.insert(test_node("a")).unwrap();
        tree.insert(test_node("Z")).unwrap();
        let names: Vec<&str> = tree.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Z", "a"]);
    }

    #[test]
    fn canonical_bytes_end_with_newline() {
        let tree = Tree::new();
        let buf = tree.to_canonical_bytes().unwrap();
        assert_eq!(buf, b"{\"nodes\":[]}\n");
    }

    #[test]
    fn reserializing_a_loaded_tree_is_identical() {
        let mut tree = Tree::new();
        for name in ["b", "a"] {
            tree.insert(test_node(name)).unwrap();
        }
        let buf = tree.to_canonical_bytes().unwrap();
        let loaded = Tree::from_bytes(&buf).unwrap();
        assert_eq!(loaded.to_canonical_bytes().unwrap(), buf);
    }
}
