//! A concrete, file-backed [`PageStore`] adapter.
//!
//! Used only by tests and by the local-sender/receiver round trip; the
//! crate's module contract stays generic over `PageStore` and never assumes
//! this is the only, or the production, implementation.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::listener::{PageId, PageStore, WriteListener};

pub struct FilePageStore {
    path: std::path::PathBuf,
    file: Mutex<File>,
    page_size: usize,
    header_size: u64,
    pages: RwLock<u64>,
    listeners: RwLock<Vec<Arc<dyn WriteListener>>>,
}

impl FilePageStore {
    /// Opens (creating if missing) a page store at `path` with `page_size`
    /// bytes per page and `header_size` bytes of leading header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path, page_size: usize, header_size: u64) -> std::io::Result<Self> {
        let file = crate::fsutil::open_rw_no_trunc(path)?;
        let len = file.metadata()?.len();
        let pages = len.saturating_sub(header_size) / page_size as u64;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            page_size,
            header_size,
            pages: RwLock::new(pages),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Grows the store to guarantee at least `pages` allocated pages,
    /// zero-filling the new tail. Used by tests setting up fixtures and by
    /// the restorer when a received partition file is shorter than what the
    /// delta replay needs to address.
    ///
    /// # Errors
    /// Returns an error if the underlying file cannot be extended.
    pub fn ensure_pages(&self, pages: u64) -> std::io::Result<()> {
        let mut current = self.pages.write();
        if pages <= *current {
            return Ok(());
        }
        let new_len = self.header_size + pages * self.page_size as u64;
        self.file.lock().set_len(new_len)?;
        *current = pages;
        Ok(())
    }
}

impl PageStore for FilePageStore {
    fn read(&self, page_id: PageId, buf: &mut [u8]) -> std::io::Result<()> {
        debug_assert!(buf.len() >= self.page_size);
        let offset = self.page_offset(page_id);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let dest = &mut buf[..self.page_size];
        match file.read_exact(dest) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                dest.fill(0);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn write(&self, page_id: PageId, buf: &[u8]) -> std::io::Result<()> {
        debug_assert!(buf.len() >= self.page_size);
        let offset = self.page_offset(page_id);
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&buf[..self.page_size])?;
        }
        {
            let mut pages = self.pages.write();
            let idx = u64::from(page_id.page_index());
            if idx + 1 > *pages {
                *pages = idx + 1;
            }
        }
        for listener in self.listeners.read().iter() {
            listener.on_page_write(page_id, &buf[..self.page_size]);
        }
        Ok(())
    }

    fn page_offset(&self, page_id: PageId) -> u64 {
        self.header_size + u64::from(page_id.page_index()) * self.page_size as u64
    }

    fn size(&self) -> u64 {
        self.header_size + *self.pages.read() * self.page_size as u64
    }

    fn pages(&self) -> u64 {
        *self.pages.read()
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn header_size(&self) -> u64 {
        self.header_size
    }

    fn add_write_listener(&self, listener: Arc<dyn WriteListener>) {
        self.listeners.write().push(listener);
    }

    fn remove_write_listener(&self, listener: &Arc<dyn WriteListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn backing_path(&self) -> Option<std::path::PathBuf> {
        Some(self.path.clone())
    }
}
