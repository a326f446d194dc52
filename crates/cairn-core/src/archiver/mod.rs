//! The archiver walks a set of targets, splits file contents into
//! content-addressed chunks, and writes a tree of metadata nodes plus a
//! snapshot object into the repository.
//!
//! Data flow: targets → [`PathTree`] → recursive walk → file saver pool
//! (files) / recursion (directories) → blob saver pool → repository →
//! tree blobs → snapshot.

mod blob_saver;
mod cancel;
mod file_saver;
mod path_tree;

pub use cancel::CancelToken;
pub use path_tree::PathTree;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use cairn_types::blob_id::BlobId;
use cairn_types::error::{CairnError, Result};

use crate::fs::{is_symlink_or_socket_error, FileKind, Fs, FsHandle, Metadata, OpenFlags};
use crate::node::{self, Node, NodeType};
use crate::repo::{BlobKind, Repository, UnpackedKind};
use crate::snapshot::{Snapshot, SnapshotOptions};
use crate::tree::Tree;

use blob_saver::BlobSaver;
use file_saver::{FileSaver, FutureNode};

/// Statistics about one stored file or directory: counts and byte sums of
/// blobs that were new to the repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemStats {
    pub data_blobs: u64,
    pub data_size: u64,
    pub tree_blobs: u64,
    pub tree_size: u64,
}

impl ItemStats {
    pub fn add(&mut self, other: ItemStats) {
        self.data_blobs += other.data_blobs;
        self.data_size += other.data_size;
        self.tree_blobs += other.tree_blobs;
        self.tree_size += other.tree_size;
    }
}

/// Returns `true` for entries that should be archived. Returning `false`
/// for a directory prunes the whole subtree. The metadata is `None` when
/// the entry could not be opened before selection.
pub type SelectFn = Box<dyn Fn(&Path, Option<&Metadata>) -> bool + Send + Sync>;

/// Per-entry error hook. `Ok(())` swallows the error and skips the entry;
/// an `Err` aborts the snapshot. Cancellation is never offered to the
/// hook.
pub type ErrorFn = Box<dyn Fn(&Path, Option<&Metadata>, CairnError) -> Result<()> + Send + Sync>;

/// Called for every file and directory once it has been processed.
/// May fire from any worker thread; interleaving between items is
/// unspecified.
pub type CompleteItemFn =
    Box<dyn Fn(&str, Option<&Node>, Option<&Node>, ItemStats, Duration) + Send + Sync>;

/// Called when a worker starts reading a file.
pub type StartFileFn = Box<dyn Fn(&str) + Send + Sync>;

/// Called per stored blob with the pre-deduplication byte count.
pub type CompleteBlobFn = Box<dyn Fn(&str, u64) + Send + Sync>;

/// An error hook that swallows soft per-entry I/O failures (permission
/// denied, not found) and aborts on anything else.
pub fn soft_error_filter() -> ErrorFn {
    Box::new(|_, _, err| {
        if err.is_soft_file_error() {
            Ok(())
        } else {
            Err(err)
        }
    })
}

/// Tunables for one [`Archiver`]. Zero-valued fields take defaults.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// How many files are read concurrently. Zero selects the default of
    /// two: on spinning media more parallel random reads degrade
    /// throughput, and the bottleneck is downstream anyway.
    pub file_read_concurrency: usize,
    /// How many blobs are hashed and stored concurrently. Zero selects
    /// the number of CPUs.
    pub save_blob_concurrency: usize,
    /// Record access times instead of mirroring the modification time.
    /// Off by default: atime churn would make every snapshot differ.
    pub with_atime: bool,
}

impl Options {
    pub fn apply_defaults(mut self) -> Self {
        if self.file_read_concurrency == 0 {
            self.file_read_concurrency = 2;
        }
        if self.save_blob_concurrency == 0 {
            self.save_blob_concurrency = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
        }
        self
    }
}

/// Saves a directory structure into a content-addressed repository.
///
/// The archiver owns its two worker pools for the duration of one
/// [`snapshot`](Archiver::snapshot) call; the repository handle and the
/// filesystem are shared with the workers.
pub struct Archiver<'a> {
    repo: &'a dyn Repository,
    fs: &'a dyn Fs,
    options: Options,

    select: SelectFn,
    error_filter: Option<ErrorFn>,
    complete_item: CompleteItemFn,
    start_file: StartFileFn,
    complete_blob: CompleteBlobFn,
}

/// Outcome of dispatching one entry: either an already-complete node or a
/// pending file future, plus the context needed to route a late error.
struct FutureEntry {
    name: String,
    path: PathBuf,
    meta: Option<Metadata>,
    state: EntryState,
}

enum EntryState {
    Ready(Node),
    File(FutureNode),
}

struct WalkCtx<'a, 'env> {
    file_saver: &'a FileSaver<'env>,
    blob_saver: &'a BlobSaver,
    cancel: &'a CancelToken,
}

impl<'a> Archiver<'a> {
    pub fn new(repo: &'a dyn Repository, fs: &'a dyn Fs, options: Options) -> Self {
        Self {
            repo,
            fs,
            options: options.apply_defaults(),
            select: Box::new(|_, _| true),
            error_filter: None,
            complete_item: Box::new(|_, _, _, _, _| {}),
            start_file: Box::new(|_| {}),
            complete_blob: Box::new(|_, _| {}),
        }
    }

    pub fn with_select(
        mut self,
        select: impl Fn(&Path, Option<&Metadata>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.select = Box::new(select);
        self
    }

    pub fn with_error_filter(
        mut self,
        filter: impl Fn(&Path, Option<&Metadata>, CairnError) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.error_filter = Some(Box::new(filter));
        self
    }

    pub fn on_complete_item(
        mut self,
        hook: impl Fn(&str, Option<&Node>, Option<&Node>, ItemStats, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.complete_item = Box::new(hook);
        self
    }

    pub fn on_start_file(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.start_file = Box::new(hook);
        self
    }

    pub fn on_complete_blob(mut self, hook: impl Fn(&str, u64) + Send + Sync + 'static) -> Self {
        self.complete_blob = Box::new(hook);
        self
    }

    /// Archive `targets` and return the persisted snapshot and its ID.
    pub fn snapshot(
        &self,
        targets: &[String],
        opts: SnapshotOptions,
    ) -> Result<(Snapshot, BlobId)> {
        self.snapshot_with_cancel(targets, opts, &CancelToken::new())
    }

    /// Like [`snapshot`](Archiver::snapshot), observing an external
    /// cancellation token. A fatal error cancels a derived child token,
    /// which drains the worker pools before the call returns.
    pub fn snapshot_with_cancel(
        &self,
        targets: &[String],
        opts: SnapshotOptions,
        cancel: &CancelToken,
    ) -> Result<(Snapshot, BlobId)> {
        let cancel = cancel.child();

        let clean_targets = self.resolve_targets(targets)?;
        let path_tree = PathTree::build(&clean_targets)?;
        debug!(targets = clean_targets.len(), "built path tree");

        let parent_tree = self.load_parent_tree(opts.parent.as_ref());
        let chunker_params = self.repo.config().chunker_params;

        let root_id = std::thread::scope(|scope| {
            let blob_saver = BlobSaver::start(
                scope,
                self.repo,
                &cancel,
                self.options.save_blob_concurrency,
            );
            let file_saver = FileSaver::start(
                scope,
                blob_saver.clone(),
                chunker_params,
                self.options.with_atime,
                &self.complete_blob,
                &cancel,
                self.options.file_read_concurrency,
            );

            let ctx = WalkCtx {
                file_saver: &file_saver,
                blob_saver: &blob_saver,
                cancel: &cancel,
            };

            let result: Result<BlobId> = (|| {
                let start = Instant::now();
                let tree = self.save_path_tree(&ctx, "/", &path_tree, parent_tree.as_ref())?;
                let (root_id, stats) = self.save_tree(&ctx, &tree)?;
                (self.complete_item)("/", None, None, stats, start.elapsed());
                Ok(root_id)
            })();

            if result.is_err() {
                cancel.cancel();
            }
            drop(ctx);
            drop(file_saver);
            drop(blob_saver);
            result
        })?;

        self.repo.flush()?;
        self.repo.save_index()?;

        let snapshot = Snapshot {
            time: opts.time,
            parent: opts.parent,
            tree: root_id,
            paths: targets.to_vec(),
            hostname: opts.hostname,
            excludes: opts.excludes,
            tags: opts.tags,
        };
        let id = self
            .repo
            .save_unpacked(UnpackedKind::Snapshot, &snapshot.to_canonical_bytes()?)?;
        debug!(snapshot = %id, tree = %root_id, "snapshot saved");
        Ok((snapshot, id))
    }

    /// Replace targets that name no component (`.`, `/`, `../..`) with the
    /// entries of that directory. Every target is lexically cleaned.
    fn resolve_targets(&self, targets: &[String]) -> Result<Vec<PathBuf>> {
        let mut result = Vec::with_capacity(targets.len());
        for target in targets {
            let cleaned = self.fs.clean(Path::new(target));
            if path_tree::has_components(&cleaned) {
                result.push(cleaned);
                continue;
            }

            debug!(target = %cleaned.display(), "expanding target to directory entries");
            let names = self
                .fs
                .read_dir_names(&cleaned)
                .map_err(|e| CairnError::path(&cleaned, e))?;
            for name in names {
                result.push(cleaned.join(name));
            }
        }
        Ok(result)
    }

    /// Route a per-entry error through the error hook. `Ok(())` means the
    /// caller skips the entry.
    fn filter_error(&self, path: &Path, meta: Option<&Metadata>, err: CairnError) -> Result<()> {
        if err.is_cancelled() {
            return Err(err);
        }
        match &self.error_filter {
            None => Err(err),
            Some(hook) => {
                let result = hook(path, meta, err);
                if result.is_ok() {
                    debug!(path = %path.display(), "per-entry error filtered by handler");
                }
                result
            }
        }
    }

    /// Store a tree blob, reporting stats when it was new.
    fn save_tree(&self, ctx: &WalkCtx<'_, '_>, tree: &Tree) -> Result<(BlobId, ItemStats)> {
        let mut stats = ItemStats::default();
        let buf = tree.to_canonical_bytes()?;
        let length = buf.len() as u64;
        let saved = ctx.blob_saver.save(BlobKind::Tree, buf).take()?;
        if !saved.known {
            stats.tree_blobs += 1;
            stats.tree_size += length;
        }
        Ok((saved.id, stats))
    }

    /// Load the subtree referenced by a previous directory node.
    /// Best-effort: on failure reuse is lost but the snapshot proceeds.
    fn load_subtree(&self, previous: Option<&Node>) -> Option<Tree> {
        let node = previous?;
        if node.node_type != NodeType::Dir {
            return None;
        }
        let id = node.subtree.as_ref()?;
        match self.repo.load_tree(id) {
            Ok(tree) => Some(tree),
            Err(err) => {
                debug!(tree = %id, error = %err, "unable to load parent subtree");
                None
            }
        }
    }

    /// Load the root tree of the parent snapshot, if any. Best-effort.
    fn load_parent_tree(&self, parent: Option<&BlobId>) -> Option<Tree> {
        let id = parent?;
        let snapshot = match self.repo.load_snapshot(id) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                debug!(snapshot = %id, error = %err, "unable to load parent snapshot");
                return None;
            }
        };
        match self.repo.load_tree(&snapshot.tree) {
            Ok(tree) => Some(tree),
            Err(err) => {
                debug!(tree = %snapshot.tree, error = %err, "unable to load parent tree");
                None
            }
        }
    }

    /// Stat the backing directory of a synthetic path-tree node. Symlinks
    /// are resolved; anything but a directory is an error.
    fn stat_dir(&self, dir: &Path) -> Result<Metadata> {
        let meta = self.fs.stat(dir).map_err(|e| CairnError::path(dir, e))?;
        if meta.kind != FileKind::Dir {
            return Err(CairnError::NotADirectory(dir.to_path_buf()));
        }
        Ok(meta)
    }

    /// Archive one level of the path tree at `sn_path`: leaves are
    /// dispatched like directory entries, interior nodes become synthetic
    /// directories whose metadata comes from their `file_info_path`.
    fn save_path_tree<'env>(
        &'env self,
        ctx: &WalkCtx<'_, 'env>,
        sn_path: &str,
        ptree: &PathTree,
        previous: Option<&Tree>,
    ) -> Result<Tree> {
        let mut tree = Tree::new();
        let mut futures: Vec<FutureEntry> = Vec::new();

        for (name, child) in ptree.children() {
            let sn_item = join_snapshot_path(sn_path, name);

            if let Some(target) = child.leaf_path() {
                let old_node = previous.and_then(|t| t.find(name));
                match self.save(ctx, &sn_item, name, target, old_node) {
                    Ok(Some(entry)) => futures.push(entry),
                    Ok(None) => {}
                    Err(err) => self.filter_error(target, None, err)?,
                }
                continue;
            }

            let start = Instant::now();
            let old_node = previous.and_then(|t| t.find(name));
            let old_subtree = self.load_subtree(old_node);

            let subtree = self.save_path_tree(ctx, &sn_item, child, old_subtree.as_ref())?;
            let (id, tree_stats) = self.save_tree(ctx, &subtree)?;

            let info_path = child.file_info_path().ok_or_else(|| {
                CairnError::Other(format!("missing directory path for {sn_item}"))
            })?;
            let meta = self.stat_dir(info_path)?;
            let mut dir_node = Node::from_metadata(name, &meta, self.options.with_atime)?;
            dir_node.xattrs = node::read_xattrs(info_path);
            dir_node.subtree = Some(id);

            (self.complete_item)(
                &format!("{sn_item}/"),
                old_node,
                Some(&dir_node),
                tree_stats,
                start.elapsed(),
            );
            tree.insert(dir_node)?;
        }

        self.collect_entries(&mut tree, futures)?;
        Ok(tree)
    }

    /// Store one directory: dispatch all children, await the file futures
    /// in name order, serialize the assembled tree, and return the
    /// directory node pointing at it.
    fn save_dir<'env>(
        &'env self,
        ctx: &WalkCtx<'_, 'env>,
        sn_path: &str,
        name: &str,
        meta: &Metadata,
        dir: &Path,
        previous: Option<&Tree>,
    ) -> Result<(Node, ItemStats)> {
        debug!(path = %dir.display(), sn_path, "saving directory");

        let mut dir_node = Node::from_metadata(name, meta, self.options.with_atime)?;
        dir_node.xattrs = node::read_xattrs(dir);

        let names = self
            .fs
            .read_dir_names(dir)
            .map_err(|e| CairnError::path(dir, e))?;

        let mut tree = Tree::new();
        let mut futures: Vec<FutureEntry> = Vec::new();

        for child_name in &names {
            let pathname = dir.join(child_name);
            let old_node = previous.and_then(|t| t.find(child_name));
            let sn_item = join_snapshot_path(sn_path, child_name);
            match self.save(ctx, &sn_item, child_name, &pathname, old_node) {
                Ok(Some(entry)) => futures.push(entry),
                Ok(None) => {}
                Err(err) => self.filter_error(&pathname, None, err)?,
            }
        }

        self.collect_entries(&mut tree, futures)?;

        let (id, tree_stats) = self.save_tree(ctx, &tree)?;
        let mut stats = ItemStats::default();
        stats.add(tree_stats);
        dir_node.subtree = Some(id);
        Ok((dir_node, stats))
    }

    /// Dispatch one filesystem entry. Returns `None` when the entry is
    /// excluded (selector, socket). Errors are routed through the error
    /// hook by the caller.
    fn save<'env>(
        &'env self,
        ctx: &WalkCtx<'_, 'env>,
        sn_path: &str,
        name: &str,
        target: &Path,
        previous: Option<&Node>,
    ) -> Result<Option<FutureEntry>> {
        if ctx.cancel.is_cancelled() {
            return Err(CairnError::Cancelled);
        }

        let abs_target = self
            .fs
            .abs(target)
            .map_err(|e| CairnError::path(target, e))?;

        let mut file: Option<Box<dyn FsHandle>> = None;
        let mut meta: Option<Metadata> = None;
        let mut stat_err: Option<std::io::Error> = None;

        let open_err = match self.fs.open(target, OpenFlags::read_only().no_follow()) {
            Ok(handle) => {
                match handle.metadata() {
                    Ok(m) => meta = Some(m),
                    Err(e) => stat_err = Some(e),
                }
                file = Some(handle);
                None
            }
            Err(e) => Some(e),
        };

        // Selection sees the entry even when the open failed; an excluded
        // entry never surfaces its error.
        if !(self.select)(&abs_target, meta.as_ref()) {
            debug!(target = %target.display(), "excluded by selector");
            return Ok(None);
        }

        if let Some(err) = open_err {
            if is_symlink_or_socket_error(&err) {
                // symlink or socket: redo the stat and carry on without a
                // handle
                match self.fs.lstat(target) {
                    Ok(m) => {
                        meta = Some(m);
                        stat_err = None;
                    }
                    Err(e) => stat_err = Some(e),
                }
            } else {
                return Err(CairnError::path(target, err));
            }
        }

        if let Some(err) = stat_err {
            return Err(CairnError::path(target, err));
        }
        let meta = meta.ok_or_else(|| {
            CairnError::Other(format!("BUG: no metadata for {}", target.display()))
        })?;

        let entry = match meta.kind {
            FileKind::File => {
                let start = Instant::now();

                if !file_changed(&meta, previous) {
                    debug!(target = %target.display(), "file unchanged, reusing previous node");
                    let node = previous
                        .cloned()
                        .ok_or_else(|| CairnError::Other("BUG: unchanged without previous".into()))?;
                    (self.complete_item)(
                        sn_path,
                        previous,
                        previous,
                        ItemStats::default(),
                        start.elapsed(),
                    );
                    (self.complete_blob)(sn_path, node.size.unwrap_or(0));
                    FutureEntry {
                        name: name.to_string(),
                        path: target.to_path_buf(),
                        meta: Some(meta),
                        state: EntryState::Ready(node),
                    }
                } else {
                    let handle = file.take().ok_or_else(|| {
                        CairnError::Other(format!("BUG: no handle for {}", target.display()))
                    })?;

                    let start_hook: file_saver::StartHook<'env> = {
                        let start_file = &self.start_file;
                        let sn = sn_path.to_string();
                        Box::new(move || start_file(&sn))
                    };
                    let complete_hook: file_saver::CompleteHook<'env> = {
                        let complete_item = &self.complete_item;
                        let sn = sn_path.to_string();
                        let previous = previous.cloned();
                        Box::new(move |node: &Node, stats: ItemStats| {
                            complete_item(&sn, previous.as_ref(), Some(node), stats, start.elapsed());
                        })
                    };

                    let future = ctx.file_saver.save(
                        sn_path.to_string(),
                        name.to_string(),
                        target.to_path_buf(),
                        handle,
                        meta,
                        start_hook,
                        complete_hook,
                    );
                    FutureEntry {
                        name: name.to_string(),
                        path: target.to_path_buf(),
                        meta: Some(meta),
                        state: EntryState::File(future),
                    }
                }
            }

            FileKind::Dir => {
                let start = Instant::now();
                let old_subtree = self.load_subtree(previous);
                let (node, stats) =
                    self.save_dir(ctx, sn_path, name, &meta, target, old_subtree.as_ref())?;
                (self.complete_item)(
                    &format!("{sn_path}/"),
                    previous,
                    Some(&node),
                    stats,
                    start.elapsed(),
                );
                FutureEntry {
                    name: name.to_string(),
                    path: target.to_path_buf(),
                    meta: Some(meta),
                    state: EntryState::Ready(node),
                }
            }

            FileKind::Socket => {
                // never representable in a snapshot
                debug!(target = %target.display(), "socket, ignoring");
                return Ok(None);
            }

            _ => {
                let mut node = Node::from_metadata(name, &meta, self.options.with_atime)?;
                if meta.kind == FileKind::Symlink {
                    let link = self
                        .fs
                        .read_link(target)
                        .map_err(|e| CairnError::path(target, e))?;
                    node.link_target = Some(link.to_string_lossy().into_owned());
                }
                FutureEntry {
                    name: name.to_string(),
                    path: target.to_path_buf(),
                    meta: Some(meta),
                    state: EntryState::Ready(node),
                }
            }
        };

        Ok(Some(entry))
    }

    /// Await the dispatched entries in order and insert the surviving
    /// nodes under their snapshot-local names. A swallowed error leaves
    /// its entry out of the tree.
    fn collect_entries(&self, tree: &mut Tree, futures: Vec<FutureEntry>) -> Result<()> {
        for entry in futures {
            let node = match entry.state {
                EntryState::Ready(node) => Some(node),
                EntryState::File(future) => match future.take() {
                    Ok((node, _stats)) => Some(node),
                    Err(err) => {
                        self.filter_error(&entry.path, entry.meta.as_ref(), err)?;
                        None
                    }
                },
            };

            match node {
                Some(mut node) => {
                    node.name = entry.name;
                    tree.insert(node)?;
                }
                None => {
                    debug!(path = %entry.path.display(), "entry skipped after error");
                }
            }
        }
        Ok(())
    }
}

/// Returns `true` if the file's content may have changed since `previous`
/// was created: type, exact modification time, size, and inode must all
/// match for a file to count as unchanged.
pub fn file_changed(meta: &Metadata, previous: Option<&Node>) -> bool {
    let Some(node) = previous else {
        return true;
    };
    if node.node_type != NodeType::File {
        return true;
    }
    if node.mtime != meta.mtime_ns {
        return true;
    }
    // Both the logical and the raw stat size must match the stored size.
    if node.size != Some(meta.size) || node.size != Some(meta.stat_size) {
        return true;
    }
    if node.inode != meta.inode {
        return true;
    }
    false
}

/// Join snapshot path elements with forward slashes.
fn join_snapshot_path(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{name}")
    } else {
        format!("{base}/{name}")
    }
}
