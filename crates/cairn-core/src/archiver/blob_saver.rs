use std::thread::Scope;

use crossbeam_channel::{bounded, Receiver, Sender};

use cairn_types::error::{CairnError, Result};

use crate::repo::{BlobKind, Repository, SavedBlob};

use super::cancel::CancelToken;

/// Submission queue slack per worker. The bounded queue is what paces the
/// walker: `save` blocks while every worker is busy and the slack is used
/// up.
const QUEUE_SLACK: usize = 2;

struct SaveBlobJob {
    kind: BlobKind,
    data: Vec<u8>,
    reply: Sender<Result<SavedBlob>>,
}

/// Resolves exactly once with the outcome of one blob submission.
pub(crate) struct FutureBlob {
    rx: Receiver<Result<SavedBlob>>,
}

impl FutureBlob {
    /// Block until a worker resolves this submission. A disconnect means
    /// the pools were drained by cancellation before the job ran.
    pub(crate) fn take(self) -> Result<SavedBlob> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(CairnError::Cancelled),
        }
    }
}

/// Worker pool hashing and storing blobs through the repository.
///
/// Submitters must not rely on completion order.
#[derive(Clone)]
pub(crate) struct BlobSaver {
    tx: Sender<SaveBlobJob>,
}

impl BlobSaver {
    /// Spawn `workers` blob workers on `scope`. The pool drains and exits
    /// once every clone of the saver has been dropped.
    pub(crate) fn start<'scope, 'env>(
        scope: &'scope Scope<'scope, 'env>,
        repo: &'env dyn Repository,
        cancel: &'env CancelToken,
        workers: usize,
    ) -> BlobSaver {
        let (tx, rx) = bounded::<SaveBlobJob>(workers * QUEUE_SLACK);
        for _ in 0..workers {
            let rx = rx.clone();
            scope.spawn(move || {
                for job in rx {
                    if cancel.is_cancelled() {
                        let _ = job.reply.send(Err(CairnError::Cancelled));
                        continue;
                    }
                    let result = repo.save_blob(job.kind, &job.data);
                    let _ = job.reply.send(result);
                }
            });
        }
        BlobSaver { tx }
    }

    /// Submit one blob. Blocks while the queue is full (backpressure).
    pub(crate) fn save(&self, kind: BlobKind, data: Vec<u8>) -> FutureBlob {
        let (reply_tx, reply_rx) = bounded(1);
        let job = SaveBlobJob {
            kind,
            data,
            reply: reply_tx,
        };
        // A failed send drops the job together with its reply sender, so
        // the future resolves with Cancelled.
        let _ = self.tx.send(job);
        FutureBlob { rx: reply_rx }
    }
}
