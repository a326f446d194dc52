use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cairn_types::blob_id::BlobId;
use cairn_types::error::Result;

/// The top-level object naming one backup: root tree, targets, timestamp,
/// optional parent. Stored unpacked; identified by the hash of its
/// canonical encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<BlobId>,
    pub tree: BlobId,
    /// The original target strings as given by the caller.
    pub paths: Vec<String>,
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Snapshot {
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Snapshot> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Attributes for a new snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    pub time: DateTime<Utc>,
    pub hostname: String,
    pub tags: Vec<String>,
    pub excludes: Vec<String>,
    pub parent: Option<BlobId>,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            time: Utc::now(),
            hostname: String::new(),
            tags: Vec::new(),
            excludes: Vec::new(),
            parent: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_snapshot() -> Snapshot {
        Snapshot {
            time: "2026-01-02T03:04:05Z".parse().unwrap(),
            parent: None,
            tree: BlobId::compute(b"tree"),
            paths: vec!["/home/u/foo".into()],
            hostname: "host".into(),
            excludes: Vec::new(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn empty_fields_are_omitted() {
        let json = String::from_utf8(test_snapshot().to_canonical_bytes().unwrap()).unwrap();
        assert!(!json.contains("\"parent\""));
        assert!(!json.contains("\"excludes\""));
        assert!(!json.contains("\"tags\""));
        assert!(json.contains("\"tree\""));
        assert!(json.ends_with('\n'));
    }

    #[test]
    fn roundtrip() {
        let mut snapshot = test_snapshot();
        snapshot.parent = Some(BlobId::compute(b"parent"));
        snapshot.tags = vec!["nightly".into()];
        let buf = snapshot.to_canonical_bytes().unwrap();
        let back = Snapshot::from_bytes(&buf).unwrap();
        assert_eq!(back, snapshot);
    }
}
