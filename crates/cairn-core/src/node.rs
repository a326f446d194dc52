use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use cairn_types::blob_id::BlobId;
use cairn_types::error::{CairnError, Result};

use crate::fs::{FileKind, Metadata};

/// Type tag for a [`Node`], serialized as the lowercase strings used in
/// tree blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Dir,
    Symlink,
    Dev,
    Chardev,
    Fifo,
    Socket,
}

/// Metadata record for one filesystem entry in a tree blob.
///
/// Field order is the canonical JSON field order. Optional fields are
/// omitted when empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Nanoseconds since the Unix epoch.
    pub mtime: i64,
    pub ctime: i64,
    pub atime: i64,
    pub inode: u64,
    pub device: u64,
    /// For regular files: sum of the sizes of the chunks in `content`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "linktarget", default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
    /// For regular files: the chunks making up the content, in offset order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<BlobId>,
    /// For directories: the tree blob holding the children. Set iff the
    /// directory was stored successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtree: Option<BlobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xattrs: Option<BTreeMap<String, Vec<u8>>>,
}

impl Node {
    /// Build a node from stat data. `name` is the snapshot-local name.
    ///
    /// When `with_atime` is off the access time mirrors the modification
    /// time, keeping repeated snapshots of an unchanged tree identical.
    pub fn from_metadata(name: &str, meta: &Metadata, with_atime: bool) -> Result<Node> {
        let node_type = match meta.kind {
            FileKind::File => NodeType::File,
            FileKind::Dir => NodeType::Dir,
            FileKind::Symlink => NodeType::Symlink,
            FileKind::BlockDevice => NodeType::Dev,
            FileKind::CharDevice => NodeType::Chardev,
            FileKind::Fifo => NodeType::Fifo,
            FileKind::Socket => NodeType::Socket,
            FileKind::Other => return Err(CairnError::UnsupportedFileType(name.into())),
        };

        Ok(Node {
            name: name.to_string(),
            node_type,
            mode: meta.mode,
            uid: meta.uid,
            gid: meta.gid,
            user: None,
            group: None,
            mtime: meta.mtime_ns,
            ctime: meta.ctime_ns,
            atime: if with_atime { meta.atime_ns } else { meta.mtime_ns },
            inode: meta.inode,
            device: meta.device,
            size: match meta.kind {
                FileKind::File => Some(meta.size),
                _ => None,
            },
            link_target: None,
            content: Vec::new(),
            subtree: None,
            xattrs: None,
        })
    }
}

/// Read the extended attributes of `path`, tolerating per-attribute
/// failures. Returns `None` when there are no readable attributes.
#[cfg(unix)]
pub(crate) fn read_xattrs(path: &Path) -> Option<BTreeMap<String, Vec<u8>>> {
    use tracing::warn;

    let names = match xattr::list(path) {
        Ok(names) => names,
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "failed to list extended attributes"
            );
            return None;
        }
    };

    let mut attrs = BTreeMap::new();
    for name in names {
        let key = match name.to_str() {
            Some(name) => name.to_string(),
            None => {
                warn!(
                    path = %path.display(),
                    attr = ?name,
                    "skipping extended attribute with non-UTF8 name"
                );
                continue;
            }
        };

        match xattr::get(path, &name) {
            Ok(Some(value)) => {
                attrs.insert(key, value);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    path = %path.display(),
                    attr = %key,
                    error = %err,
                    "failed to read extended attribute"
                );
            }
        }
    }

    if attrs.is_empty() {
        None
    } else {
        Some(attrs)
    }
}

#[cfg(not(unix))]
pub(crate) fn read_xattrs(_path: &Path) -> Option<BTreeMap<String, Vec<u8>>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_metadata() -> Metadata {
        Metadata {
            kind: FileKind::File,
            mode: 0o644,
            uid: 1000,
            gid: 1000,
            size: 42,
            stat_size: 42,
            mtime_ns: 1_700_000_000_000_000_500,
            ctime_ns: 1_700_000_000_000_000_600,
            atime_ns: 1_700_000_123_000_000_000,
            inode: 7,
            device: 3,
        }
    }

    #[test]
    fn from_metadata_file() {
        let node = Node::from_metadata("a.txt", &file_metadata(), false).unwrap();
        assert_eq!(node.node_type, NodeType::File);
        assert_eq!(node.size, Some(42));
        assert!(node.content.is_empty());
        assert!(node.subtree.is_none());
    }

    #[test]
    fn atime_mirrors_mtime_unless_enabled() {
        let meta = file_metadata();
        let without = Node::from_metadata("a", &meta, false).unwrap();
        assert_eq!(without.atime, meta.mtime_ns);

        let with = Node::from_metadata("a", &meta, true).unwrap();
        assert_eq!(with.atime, meta.atime_ns);
    }

    #[test]
    fn dir_has_no_size() {
        let meta = Metadata {
            kind: FileKind::Dir,
            ..file_metadata()
        };
        let node = Node::from_metadata("d", &meta, false).unwrap();
        assert_eq!(node.node_type, NodeType::Dir);
        assert_eq!(node.size, None);
    }

    #[test]
    fn unsupported_kind_is_an_error() {
        let meta = Metadata {
            kind: FileKind::Other,
            ..file_metadata()
        };
        assert!(Node::from_metadata("weird", &meta, false).is_err());
    }

    #[test]
    fn type_tags_serialize_lowercase() {
        for (node_type, tag) in [
            (NodeType::File, "\"file\""),
            (NodeType::Dir, "\"dir\""),
            (NodeType::Symlink, "\"symlink\""),
            (NodeType::Dev, "\"dev\""),
            (NodeType::Chardev, "\"chardev\""),
            (NodeType::Fifo, "\"fifo\""),
            (NodeType::Socket, "\"socket\""),
        ] {
            assert_eq!(serde_json::to_string(&node_type).unwrap(), tag);
        }
    }

    #[test]
    fn empty_optional_fields_are_omitted() {
        let node = Node::from_metadata("d", &file_metadata(), false).unwrap();
        let json = serde_json::to_string(&node).unwrap();
        assert!(!json.contains("\"content\""));
        assert!(!json.contains("\"subtree\""));
        assert!(!json.contains("\"linktarget\""));
        assert!(!json.contains("\"user\""));
        assert!(!json.contains("\"xattrs\""));
        assert!(json.contains("\"size\""));
    }

    #[test]
    fn serde_roundtrip() {
        let mut node = Node::from_metadata("a", &file_metadata(), false).unwrap();
        node.content = vec![BlobId::compute(b"chunk")];
        let json = serde_json::to_vec(&node).unwrap();
        let back: Node = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, node);
    }
}
