//! Deterministic test doubles shared by `module_tests` and `integration_tests`.
//!
//! Grounded on the same "fake collaborator" pattern the crate's own unit
//! tests use for [`partition_snapshot_core::checkpoint::CheckpointSubsystem`]
//! (see the `FakeCheckpoint` in `snapshot_task.rs`'s tests) and on the
//! storage-checkpoint reference material's `FsCheckpointWriter` fake: a
//! hand-rolled implementation that lets a test drive a lifecycle
//! deterministically instead of racing a real background thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use partition_snapshot_core::checkpoint::{
    CheckpointContext, CheckpointListener, CheckpointProgress, CheckpointReason, CheckpointSubsystem,
};
use partition_snapshot_core::errors::Result;
use partition_snapshot_core::pagestore::{PageId, PageStore, WriteListener};

/// In-memory, `Vec<u8>`-backed [`PageStore`] with an injectable
/// write-listener list. Has no `backing_path`, so it can drive delta-writer
/// and page-adapter tests without touching the filesystem, but cannot back
/// a real snapshot tail-copy (that needs a file per the design's
/// `backing_path` contract).
pub struct FakePageStore {
    page_size: usize,
    header_size: u64,
    pages: Mutex<HashMap<u32, Vec<u8>>>,
    page_count: AtomicU64,
    listeners: Mutex<Vec<Arc<dyn WriteListener>>>,
}

impl FakePageStore {
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            header_size: 0,
            pages: Mutex::new(HashMap::new()),
            page_count: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl PageStore for FakePageStore {
    fn read(&self, page_id: PageId, buf: &mut [u8]) -> std::io::Result<()> {
        let pages = self.pages.lock().unwrap();
        match pages.get(&page_id.page_index()) {
            Some(data) => buf[..self.page_size].copy_from_slice(data),
            None => buf[..self.page_size].fill(0),
        }
        Ok(())
    }

    fn write(&self, page_id: PageId, buf: &[u8]) -> std::io::Result<()> {
        self.pages.lock().unwrap().insert(page_id.page_index(), buf[..self.page_size].to_vec());
        let idx = u64::from(page_id.page_index());
        self.page_count.fetch_max(idx + 1, Ordering::Relaxed);
        for listener in self.listeners.lock().unwrap().iter() {
            listener.on_page_write(page_id, &buf[..self.page_size]);
        }
        Ok(())
    }

    fn page_offset(&self, page_id: PageId) -> u64 {
        self.header_size + u64::from(page_id.page_index()) * self.page_size as u64
    }

    fn size(&self) -> u64 {
        self.header_size + self.page_count.load(Ordering::Relaxed) * self.page_size as u64
    }

    fn pages(&self) -> u64 {
        self.page_count.load(Ordering::Relaxed)
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn header_size(&self) -> u64 {
        self.header_size
    }

    fn add_write_listener(&self, listener: Arc<dyn WriteListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn remove_write_listener(&self, listener: &Arc<dyn WriteListener>) {
        self.listeners.lock().unwrap().retain(|l| !Arc::ptr_eq(l, listener));
    }
}

/// A [`CheckpointSubsystem`] double that runs every hook synchronously when
/// [`FakeCheckpointSubsystem::drive`] is called, with no real write-lock or
/// background thread, so integration tests can exercise the full
/// mark-begin -> mark-end -> checkpoint-begin -> finished sequence on
/// demand.
pub struct FakeCheckpointSubsystem {
    listener: Mutex<Option<Arc<dyn CheckpointListener>>>,
}

impl FakeCheckpointSubsystem {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { listener: Mutex::new(None) })
    }

    /// Runs one checkpoint cycle through all four listener hooks in order.
    pub fn drive(&self, reason: &str) {
        let listener = self.listener.lock().unwrap().clone().expect("listener registered before drive()");
        let ctx = CheckpointContext { reason: reason.to_string() };
        listener.before_checkpoint_begin(&ctx);
        listener.on_mark_checkpoint_begin(&ctx);
        listener.on_mark_checkpoint_end(&ctx).expect("on_mark_checkpoint_end should not fail in this fixture");
        listener.on_checkpoint_begin(&ctx);
    }
}

impl CheckpointSubsystem for FakeCheckpointSubsystem {
    fn add_checkpoint_listener(&self, listener: Arc<dyn CheckpointListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    fn remove_checkpoint_listener(&self, _listener: &Arc<dyn CheckpointListener>) {
        *self.listener.lock().unwrap() = None;
    }

    fn wakeup_for_checkpoint(&self, _reason: CheckpointReason) {}

    fn force_checkpoint(&self, _reason: CheckpointReason) -> CheckpointProgress {
        let (mut tx, rx) = CheckpointProgress::new_pair();
        tx.mark_stored();
        tx.finish(Ok(()));
        rx
    }
}

/// An in-memory duplex byte stream: bytes written on one end are read back
/// on the other. Used as the `Channel` between a sender and receiver in
/// integration tests that exercise the chunked-transmission protocol
/// without a real socket.
pub struct LoopChannel {
    pub inbox: std::io::Cursor<Vec<u8>>,
    pub outbox: Vec<u8>,
}

impl LoopChannel {
    #[must_use]
    pub fn new() -> Self {
        Self { inbox: std::io::Cursor::new(Vec::new()), outbox: Vec::new() }
    }

    /// Turns this end's outbox into a fresh channel whose inbox replays
    /// those bytes, simulating the peer side of the same session.
    #[must_use]
    pub fn peer(self) -> Self {
        Self { inbox: std::io::Cursor::new(self.outbox), outbox: Vec::new() }
    }
}

impl Default for LoopChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::io::Read for LoopChannel {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::Read::read(&mut self.inbox, buf)
    }
}

impl std::io::Write for LoopChannel {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::Write::write(&mut self.outbox, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[allow(dead_code)]
pub fn never_stop() -> partition_snapshot_core::transmission::StopCheckFn {
    Arc::new(|| false)
}

#[allow(dead_code)]
pub type SupportResult<T> = Result<T>;
