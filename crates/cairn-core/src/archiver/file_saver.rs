use std::path::{Path, PathBuf};
use std::thread::Scope;

use crossbeam_channel::{bounded, Receiver, Sender};

use cairn_types::error::{CairnError, Result};

use crate::chunker::{estimate_chunk_count, ChunkStream, ChunkerParams};
use crate::fs::{FsHandle, Metadata};
use crate::node::{self, Node};
use crate::repo::BlobKind;

use super::blob_saver::BlobSaver;
use super::cancel::CancelToken;
use super::{CompleteBlobFn, ItemStats};

const QUEUE_SLACK: usize = 2;

/// Called once a worker takes the job, not at submission.
pub(crate) type StartHook<'env> = Box<dyn FnOnce() + Send + 'env>;

/// Called with the finished node and the stats of new blobs.
pub(crate) type CompleteHook<'env> = Box<dyn FnOnce(&Node, ItemStats) + Send + 'env>;

struct FileJob<'env> {
    sn_path: String,
    name: String,
    path: PathBuf,
    handle: Box<dyn FsHandle>,
    meta: Metadata,
    start: StartHook<'env>,
    complete: CompleteHook<'env>,
    reply: Sender<Result<(Node, ItemStats)>>,
}

/// Resolves exactly once with the completed file node and its stats.
pub(crate) struct FutureNode {
    rx: Receiver<Result<(Node, ItemStats)>>,
}

impl FutureNode {
    pub(crate) fn take(self) -> Result<(Node, ItemStats)> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(CairnError::Cancelled),
        }
    }
}

/// Worker pool reading and chunking files.
///
/// Deliberately small: on spinning media additional parallel random reads
/// degrade throughput, and the bottleneck is downstream anyway.
pub(crate) struct FileSaver<'env> {
    tx: Sender<FileJob<'env>>,
}

impl<'env> FileSaver<'env> {
    pub(crate) fn start<'scope>(
        scope: &'scope Scope<'scope, 'env>,
        blob_saver: BlobSaver,
        params: ChunkerParams,
        with_atime: bool,
        complete_blob: &'env CompleteBlobFn,
        cancel: &'env CancelToken,
        workers: usize,
    ) -> FileSaver<'env> {
        let (tx, rx) = bounded::<FileJob<'env>>(workers * QUEUE_SLACK);
        for _ in 0..workers {
            let rx = rx.clone();
            let blob_saver = blob_saver.clone();
            scope.spawn(move || {
                for job in rx {
                    if cancel.is_cancelled() {
                        let _ = job.reply.send(Err(CairnError::Cancelled));
                        continue;
                    }

                    let FileJob {
                        sn_path,
                        name,
                        path,
                        handle,
                        meta,
                        start,
                        complete,
                        reply,
                    } = job;

                    start();
                    let result = save_file(
                        &blob_saver,
                        &params,
                        with_atime,
                        complete_blob,
                        cancel,
                        &sn_path,
                        &name,
                        &path,
                        handle,
                        &meta,
                    );
                    if let Ok((node, stats)) = &result {
                        complete(node, *stats);
                    }
                    let _ = reply.send(result);
                }
            });
        }
        FileSaver { tx }
    }

    /// Submit one open file. Blocks while the queue is full.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn save(
        &self,
        sn_path: String,
        name: String,
        path: PathBuf,
        handle: Box<dyn FsHandle>,
        meta: Metadata,
        start: StartHook<'env>,
        complete: CompleteHook<'env>,
    ) -> FutureNode {
        let (reply_tx, reply_rx) = bounded(1);
        let job = FileJob {
            sn_path,
            name,
            path,
            handle,
            meta,
            start,
            complete,
            reply: reply_tx,
        };
        let _ = self.tx.send(job);
        FutureNode { rx: reply_rx }
    }
}

/// Chunk one file and assemble its node. The handle is closed on every
/// exit path; the chunk futures are awaited in file offset order.
#[allow(clippy::too_many_arguments)]
fn save_file(
    blob_saver: &BlobSaver,
    params: &ChunkerParams,
    with_atime: bool,
    complete_blob: &CompleteBlobFn,
    cancel: &CancelToken,
    sn_path: &str,
    name: &str,
    path: &Path,
    handle: Box<dyn FsHandle>,
    meta: &Metadata,
) -> Result<(Node, ItemStats)> {
    let mut node = Node::from_metadata(name, meta, with_atime)?;
    node.xattrs = node::read_xattrs(path);

    let mut futures = Vec::with_capacity(estimate_chunk_count(meta.size, params.avg_size));
    let mut stream = ChunkStream::new(handle, params);
    for chunk in &mut stream {
        let chunk = chunk.map_err(|err| CairnError::path(path, err))?;
        if cancel.is_cancelled() {
            return Err(CairnError::Cancelled);
        }
        let length = chunk.data.len() as u64;
        futures.push((blob_saver.save(BlobKind::Data, chunk.data), length));
    }
    // EOF: close the file before waiting on the chunk futures.
    drop(stream);

    let mut stats = ItemStats::default();
    let mut size = 0u64;
    let mut content = Vec::with_capacity(futures.len());
    for (future, length) in futures {
        let saved = future.take()?;
        content.push(saved.id);
        size += length;
        if !saved.known {
            stats.data_blobs += 1;
            stats.data_size += length;
        }
        complete_blob(sn_path, length);
    }

    node.content = content;
    node.size = Some(size);
    Ok((node, stats))
}
