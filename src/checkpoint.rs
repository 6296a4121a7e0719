//! Checkpoint subsystem contract (collaborator consumed by C3/C7).
//!
//! The checkpoint subsystem itself is out of scope for this crate (see the
//! crate's non-goals); this module only captures the callback/lifecycle
//! contract the snapshot task and the partition restorer drive against, the
//! way the storage-checkpoint reference abstracts its own I/O behind a
//! `CheckpointWriter` trait so it can be driven deterministically in tests.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::errors::Result;

/// Why a checkpoint was requested. Opaque to this crate; forwarded to the
/// subsystem for its own bookkeeping/logging.
pub type CheckpointReason = String;

/// Context handed to listener callbacks for one checkpoint cycle.
#[derive(Debug, Clone)]
pub struct CheckpointContext {
    pub reason: CheckpointReason,
}

/// Completion signals for one `force_checkpoint` call.
///
/// `marker_stored` resolves once the checkpoint marker has been durably
/// written to disk (`MARKER_STORED_TO_DISK`); `finished` resolves once the
/// checkpoint reaches `FINISHED`, carrying the checkpoint's own result so a
/// failure there propagates to whoever is awaiting it (e.g. the snapshot
/// task's `checkpointEnd` promise).
pub struct CheckpointProgress {
    pub marker_stored: oneshot::Receiver<()>,
    pub finished: oneshot::Receiver<Result<()>>,
}

/// The sending half of a [`CheckpointProgress`], held by a subsystem
/// implementation (or a test fake) to drive the two completion signals.
pub struct CheckpointProgressSender {
    marker_stored: Option<oneshot::Sender<()>>,
    finished: Option<oneshot::Sender<Result<()>>>,
}

impl CheckpointProgress {
    #[must_use]
    pub fn new_pair() -> (CheckpointProgressSender, Self) {
        let (marker_tx, marker_rx) = oneshot::channel();
        let (finished_tx, finished_rx) = oneshot::channel();
        (
            CheckpointProgressSender { marker_stored: Some(marker_tx), finished: Some(finished_tx) },
            Self { marker_stored: marker_rx, finished: finished_rx },
        )
    }
}

impl CheckpointProgressSender {
    pub fn mark_stored(&mut self) {
        if let Some(tx) = self.marker_stored.take() {
            let _ = tx.send(());
        }
    }

    pub fn finish(&mut self, result: Result<()>) {
        if let Some(tx) = self.finished.take() {
            let _ = tx.send(result);
        }
    }
}

/// Callbacks a checkpoint-driven component registers to observe a
/// checkpoint's lifecycle. All four hooks are invoked on the checkpoint
/// thread; `on_mark_checkpoint_begin`/`on_mark_checkpoint_end` run with the
/// subsystem's write-lock held, `before_checkpoint_begin`/`on_checkpoint_begin`
/// run after it is released.
pub trait CheckpointListener: Send + Sync {
    /// Called before the write-lock is taken; an opportunity to request
    /// allocation statistics be collected for this checkpoint.
    fn before_checkpoint_begin(&self, ctx: &CheckpointContext) {
        let _ = ctx;
    }

    /// Called with the write-lock held, before counters move.
    fn on_mark_checkpoint_begin(&self, ctx: &CheckpointContext) {
        let _ = ctx;
    }

    /// Called with the write-lock still held, once counters are stable for
    /// this checkpoint. Returning an error aborts the listener's own
    /// operation (not the checkpoint itself).
    fn on_mark_checkpoint_end(&self, ctx: &CheckpointContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Called after the write-lock is released.
    fn on_checkpoint_begin(&self, ctx: &CheckpointContext) {
        let _ = ctx;
    }
}

/// The checkpoint subsystem, consumed as an opaque collaborator.
pub trait CheckpointSubsystem: Send + Sync {
    fn add_checkpoint_listener(&self, listener: Arc<dyn CheckpointListener>);

    fn remove_checkpoint_listener(&self, listener: &Arc<dyn CheckpointListener>);

    /// Requests a checkpoint run soon, without blocking for it.
    fn wakeup_for_checkpoint(&self, reason: CheckpointReason);

    /// Requests a checkpoint and returns a handle to observe its progress.
    fn force_checkpoint(&self, reason: CheckpointReason) -> CheckpointProgress;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn progress_pair_delivers_both_signals() {
        let (mut tx, progress) = CheckpointProgress::new_pair();
        tx.mark_stored();
        tx.finish(Ok(()));
        progress.marker_stored.await.unwrap();
        assert!(progress.finished.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn progress_pair_propagates_failure() {
        let (mut tx, progress) = CheckpointProgress::new_pair();
        tx.mark_stored();
        tx.finish(Err(crate::errors::CoreError::State("checkpoint failed".into())));
        progress.marker_stored.await.unwrap();
        assert!(progress.finished.await.unwrap().is_err());
    }
}
