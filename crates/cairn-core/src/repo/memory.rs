use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use cairn_types::blob_id::BlobId;
use cairn_types::error::{CairnError, Result};

use crate::snapshot::Snapshot;
use crate::tree::Tree;

use super::{BlobKind, RepoConfig, Repository, SavedBlob, UnpackedKind};

struct StoredBlob {
    kind: BlobKind,
    data: Vec<u8>,
}

/// In-memory, HashMap-based repository.
///
/// Intended for tests and embedding. Writes are idempotent: a blob is
/// stored at most once per content address. Thread-safe via `RwLock`.
pub struct MemoryRepository {
    config: RepoConfig,
    blobs: RwLock<HashMap<BlobId, StoredBlob>>,
    unpacked: RwLock<HashMap<BlobId, Vec<u8>>>,
    new_data_blobs: AtomicU64,
    new_tree_blobs: AtomicU64,
    flushes: AtomicU64,
    index_saves: AtomicU64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::with_config(RepoConfig::default())
    }

    pub fn with_config(config: RepoConfig) -> Self {
        Self {
            config,
            blobs: RwLock::new(HashMap::new()),
            unpacked: RwLock::new(HashMap::new()),
            new_data_blobs: AtomicU64::new(0),
            new_tree_blobs: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            index_saves: AtomicU64::new(0),
        }
    }

    /// Number of blobs stored so far for `kind`.
    pub fn blob_count(&self, kind: BlobKind) -> usize {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|b| b.kind == kind)
            .count()
    }

    /// Monotonic count of blobs that were new at save time.
    pub fn new_blob_count(&self, kind: BlobKind) -> u64 {
        match kind {
            BlobKind::Data => self.new_data_blobs.load(Ordering::Relaxed),
            BlobKind::Tree => self.new_tree_blobs.load(Ordering::Relaxed),
        }
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn index_save_count(&self) -> u64 {
        self.index_saves.load(Ordering::Relaxed)
    }

    /// Raw bytes of a stored blob, for content checks.
    pub fn blob_data(&self, id: &BlobId) -> Option<Vec<u8>> {
        self.blobs
            .read()
            .expect("lock poisoned")
            .get(id)
            .map(|b| b.data.clone())
    }

    pub fn contains(&self, id: &BlobId) -> bool {
        self.blobs.read().expect("lock poisoned").contains_key(id)
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository for MemoryRepository {
    fn save_blob(&self, kind: BlobKind, data: &[u8]) -> Result<SavedBlob> {
        let id = BlobId::compute(data);
        let mut map = self.blobs.write().expect("lock poisoned");
        if map.contains_key(&id) {
            return Ok(SavedBlob { id, known: true });
        }
        map.insert(
            id,
            StoredBlob {
                kind,
                data: data.to_vec(),
            },
        );
        match kind {
            BlobKind::Data => self.new_data_blobs.fetch_add(1, Ordering::Relaxed),
            BlobKind::Tree => self.new_tree_blobs.fetch_add(1, Ordering::Relaxed),
        };
        Ok(SavedBlob { id, known: false })
    }

    fn load_tree(&self, id: &BlobId) -> Result<Tree> {
        let map = self.blobs.read().expect("lock poisoned");
        let blob = map.get(id).ok_or(CairnError::BlobNotFound(*id))?;
        Tree::from_bytes(&blob.data)
    }

    fn load_snapshot(&self, id: &BlobId) -> Result<Snapshot> {
        let map = self.unpacked.read().expect("lock poisoned");
        let data = map.get(id).ok_or(CairnError::BlobNotFound(*id))?;
        Snapshot::from_bytes(data)
    }

    fn save_unpacked(&self, _kind: UnpackedKind, data: &[u8]) -> Result<BlobId> {
        let id = BlobId::compute(data);
        self.unpacked
            .write()
            .expect("lock poisoned")
            .entry(id)
            .or_insert_with(|| data.to_vec());
        Ok(id)
    }

    fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn save_index(&self) -> Result<()> {
        self.index_saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn config(&self) -> &RepoConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_reports_known_on_second_write() {
        let repo = MemoryRepository::new();
        let first = repo.save_blob(BlobKind::Data, b"payload").unwrap();
        assert!(!first.known);
        let second = repo.save_blob(BlobKind::Data, b"payload").unwrap();
        assert!(second.known);
        assert_eq!(first.id, second.id);
        assert_eq!(repo.new_blob_count(BlobKind::Data), 1);
        assert_eq!(repo.blob_count(BlobKind::Data), 1);
    }

    #[test]
    fn load_tree_roundtrip() {
        let repo = MemoryRepository::new();
        let tree = Tree::new();
        let buf = tree.to_canonical_bytes().unwrap();
        let saved = repo.save_blob(BlobKind::Tree, &buf).unwrap();
        let loaded = repo.load_tree(&saved.id).unwrap();
        assert_eq!(loaded, tree);
    }

    #[test]
    fn load_missing_blob_fails() {
        let repo = MemoryRepository::new();
        let id = BlobId::compute(b"nothing stored");
        assert!(matches!(
            repo.load_tree(&id),
            Err(CairnError::BlobNotFound(_))
        ));
    }

    #[test]
    fn snapshot_identified_by_content_hash() {
        let repo = MemoryRepository::new();
        let id = repo
            .save_unpacked(UnpackedKind::Snapshot, b"snapshot bytes")
            .unwrap();
        assert_eq!(id, BlobId::compute(b"snapshot bytes"));
    }

    #[test]
    fn concurrent_saves_dedup() {
        use std::sync::Arc;

        let repo = Arc::new(MemoryRepository::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            handles.push(std::thread::spawn(move || {
                for i in 0..50u32 {
                    repo.save_blob(BlobKind::Data, &i.to_le_bytes()).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(repo.blob_count(BlobKind::Data), 50);
        assert_eq!(repo.new_blob_count(BlobKind::Data), 50);
    }
}
