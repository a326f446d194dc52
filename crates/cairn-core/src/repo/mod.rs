pub mod memory;

use serde::{Deserialize, Serialize};

use cairn_types::blob_id::BlobId;
use cairn_types::error::Result;

use crate::chunker::ChunkerParams;
use crate::snapshot::Snapshot;
use crate::tree::Tree;

/// Kind tag for packed blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    Data,
    Tree,
}

/// Kind tag for unpacked top-level objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnpackedKind {
    Snapshot,
}

/// Outcome of one blob save.
#[derive(Debug, Clone, Copy)]
pub struct SavedBlob {
    pub id: BlobId,
    /// `true` when the blob was already present in the repository index at
    /// submission time and no new bytes were written.
    pub known: bool,
}

/// Static repository parameters consumed by the archiver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub chunker_params: ChunkerParams,
}

/// Narrow interface to a content-addressed blob store.
///
/// All methods must be safe for concurrent use; the archiver's worker
/// pools share one repository handle.
pub trait Repository: Send + Sync {
    /// Store `data` under its content address, deduplicating against the
    /// repository index.
    fn save_blob(&self, kind: BlobKind, data: &[u8]) -> Result<SavedBlob>;

    fn load_tree(&self, id: &BlobId) -> Result<Tree>;

    fn load_snapshot(&self, id: &BlobId) -> Result<Snapshot>;

    /// Store a top-level object outside the pack structure. Returns the
    /// hash of `data`, which is the object's identity.
    fn save_unpacked(&self, kind: UnpackedKind, data: &[u8]) -> Result<BlobId>;

    /// Write any buffered blobs out.
    fn flush(&self) -> Result<()>;

    /// Persist the deduplication index.
    fn save_index(&self) -> Result<()>;

    fn config(&self) -> &RepoConfig;
}
