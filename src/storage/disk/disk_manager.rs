use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, HEADER_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for the actual disk I/O: reading and writing
/// fixed-size pages and handing out page ids. Page 0 is the header page and
/// is never returned by `allocate_page`.
pub struct DiskManager {
    db_file: Mutex<File>,
    next_page_id: AtomicI32,
    free_pages: Mutex<Vec<PageId>>,
}

impl DiskManager {
    /// Open (or create) the database file at `db_path`.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let file_size = file.metadata()?.len();
        let pages_on_disk = (file_size / PAGE_SIZE as u64) as PageId;
        // Page 0 is reserved for the header page even in a fresh file.
        let next_page_id = pages_on_disk.max(HEADER_PAGE_ID + 1);

        Ok(Self {
            db_file: Mutex::new(file),
            next_page_id: AtomicI32::new(next_page_id),
            free_pages: Mutex::new(Vec::new()),
        })
    }

    /// Read a page from disk into `buf`. Pages that were allocated but never
    /// written yet read back as zeroes.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Write a page image to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    /// Hand out a page id, preferring previously deallocated ones.
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        if let Some(page_id) = self.free_pages.lock().pop() {
            return Ok(page_id);
        }
        Ok(self.next_page_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Return a page id to the allocator for reuse.
    pub fn deallocate_page(&self, page_id: PageId) {
        if page_id > HEADER_PAGE_ID {
            self.free_pages.lock().push(page_id);
        }
    }
}
