//! Delta writer (C2): per-partition copy-on-write capture of pages modified
//! during the snapshot window.

use std::cell::RefCell;
use std::fs::File;
use std::io::Write as _;
use std::sync::Arc;

use bincode::config::standard;
use parking_lot::{Mutex, RwLock};

use crate::errors::{CoreError, Result};
use crate::pagestore::{PageFrame, PageId, PageStore, WriteListener};

use super::bitset::AtomicBitSet;

/// Supplies whether the checkpoint this delta writer is tracking has
/// reached its `FINISHED` event yet.
pub type CpDoneFn = Arc<dyn Fn() -> bool + Send + Sync>;
/// Supplies whether the owning snapshot task has been cancelled.
pub type InterruptFn = Arc<dyn Fn() -> bool + Send + Sync>;

thread_local! {
    static LOCAL_BUF: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

struct DeltaState {
    bitset: Option<AtomicBitSet>,
    part_copied: bool,
}

/// Captures pages of one partition's store that are written during the
/// snapshot window, so the post-checkpoint tail copy plus this delta
/// reconstruct the store's contents at the checkpoint barrier.
pub struct DeltaWriter {
    store: Arc<dyn PageStore>,
    file: Mutex<File>,
    state: RwLock<DeltaState>,
    cp_done: CpDoneFn,
    interrupt: InterruptFn,
    page_size_override: Option<usize>,
}

impl DeltaWriter {
    #[must_use]
    pub fn new(store: Arc<dyn PageStore>, file: File, cp_done: CpDoneFn, interrupt: InterruptFn) -> Self {
        Self {
            store,
            file: Mutex::new(file),
            state: RwLock::new(DeltaState { bitset: None, part_copied: false }),
            cp_done,
            interrupt,
            page_size_override: None,
        }
    }

    /// Overrides the page size used to size the post-barrier read buffer,
    /// in place of querying the backing `PageStore`. Must be set, if at
    /// all, before the writer is registered as a write listener.
    pub fn set_page_size_override(&mut self, size: Option<usize>) {
        self.page_size_override = size;
    }

    fn effective_page_size(&self) -> usize {
        self.page_size_override.unwrap_or_else(|| self.store.page_size())
    }

    /// Sizes the internal bit-set to `allocated_page_count` bits. Must be
    /// called exactly once, under the checkpoint write-lock.
    pub fn init(&self, allocated_page_count: usize) {
        let mut state = self.state.write();
        debug_assert!(state.bitset.is_none(), "DeltaWriter::init called more than once");
        state.bitset = Some(AtomicBitSet::new(allocated_page_count));
    }

    #[must_use]
    pub fn is_inited(&self) -> bool {
        self.state.read().bitset.is_some()
    }

    fn stopped(&self, state: &DeltaState) -> bool {
        ((self.cp_done)() && state.part_copied) || (self.interrupt)()
    }

    /// Flips `part_copied` once the sink has finished reading the
    /// partition's tail. Takes the write-lock.
    pub fn mark_partition_copied(&self) {
        self.state.write().part_copied = true;
    }

    /// Detaches and closes the delta file. Idempotent: a second call is a
    /// no-op other than flushing again.
    ///
    /// # Errors
    /// Returns an error if the underlying file cannot be flushed.
    pub fn close(&self) -> Result<()> {
        self.file.lock().flush()?;
        Ok(())
    }

    fn append_frame(&self, frame: &PageFrame) -> Result<()> {
        let mut file = self.file.lock();
        bincode::serde::encode_into_std_write(frame, &mut *file, standard())
            .map_err(CoreError::Encode)?;
        Ok(())
    }
}

impl WriteListener for DeltaWriter {
    fn on_page_write(&self, page_id: PageId, buf: &[u8]) {
        let state = self.state.read();
        let Some(bitset) = state.bitset.as_ref() else {
            return;
        };
        if self.stopped(&state) {
            return;
        }

        if !(self.cp_done)() {
            let frame = PageFrame::new(page_id.0, buf.to_vec());
            if let Err(err) = self.append_frame(&frame) {
                log::warn!("delta writer failed to append pre-barrier page {page_id:?}: {err}");
            }
            return;
        }

        if state.part_copied {
            return;
        }

        let idx = page_id.page_index() as usize;
        if !bitset.try_set(idx) {
            return;
        }

        let page_size = self.effective_page_size();
        LOCAL_BUF.with(|cell| {
            let mut local = cell.borrow_mut();
            if local.len() != page_size {
                local.resize(page_size, 0);
            }
            if let Err(err) = self.store.read(page_id, &mut local) {
                log::warn!("delta writer failed to read current page {page_id:?}: {err}");
                return;
            }
            let frame = PageFrame::new(page_id.0, local.clone());
            if let Err(err) = self.append_frame(&frame) {
                log::warn!("delta writer failed to append post-barrier page {page_id:?}: {err}");
            }
        });
    }
}
