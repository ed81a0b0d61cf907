use std::sync::Arc;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::{PageError, PageManager};

#[derive(Error, Debug)]
pub enum TableHeapError {
    #[error("Tuple {0} not found")]
    TupleNotFound(Rid),
    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
    #[error("Page error: {0}")]
    PageError(#[from] PageError),
}

/// A table heap is a singly linked chain of slotted record pages. It is the
/// record store the catalog and the executors sit on; tuples are opaque byte
/// strings addressed by `Rid`.
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    page_manager: PageManager,
    first_page_id: Mutex<PageId>,
}

impl TableHeap {
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            page_manager: PageManager::new(),
            first_page_id: Mutex::new(INVALID_PAGE_ID),
        }
    }

    pub fn first_page_id(&self) -> PageId {
        *self.first_page_id.lock()
    }

    /// Append a tuple, allocating and chaining a new page when the last one
    /// is full.
    pub fn insert_tuple(&self, data: &[u8]) -> Result<Rid, TableHeapError> {
        let mut first = self.first_page_id.lock();

        if *first == INVALID_PAGE_ID {
            let (page_ptr, page_id) = self.buffer_pool.new_page()?;
            {
                let mut page = page_ptr.write();
                self.page_manager.init_page(&mut page);
            }
            *first = page_id;
            self.buffer_pool.unpin_page(page_id, true);
        }

        let mut page_id = *first;
        loop {
            let page_ptr = self.buffer_pool.fetch_page(page_id)?;
            let mut page = page_ptr.write();

            match self.page_manager.insert_record(&mut page, data) {
                Ok(slot) => {
                    drop(page);
                    self.buffer_pool.unpin_page(page_id, true);
                    return Ok(Rid::new(page_id, slot));
                }
                Err(PageError::InsufficientSpace) => {
                    let next = self.page_manager.next_page_id(&page);
                    if next != INVALID_PAGE_ID {
                        drop(page);
                        self.buffer_pool.unpin_page(page_id, false);
                        page_id = next;
                        continue;
                    }
                    // Last page in the chain: extend it.
                    let (new_ptr, new_page_id) = self.buffer_pool.new_page()?;
                    {
                        let mut new_page = new_ptr.write();
                        self.page_manager.init_page(&mut new_page);
                    }
                    self.page_manager.set_next_page_id(&mut page, new_page_id);
                    drop(page);
                    self.buffer_pool.unpin_page(page_id, true);
                    self.buffer_pool.unpin_page(new_page_id, true);
                    page_id = new_page_id;
                }
                Err(e) => {
                    drop(page);
                    self.buffer_pool.unpin_page(page_id, false);
                    return Err(e.into());
                }
            }
        }
    }

    pub fn get_tuple(&self, rid: Rid) -> Result<Vec<u8>, TableHeapError> {
        let page_ptr = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let page = page_ptr.read();
            self.page_manager.get_record(&page, rid.slot)
        };
        self.buffer_pool.unpin_page(rid.page_id, false);
        result.map_err(|_| TableHeapError::TupleNotFound(rid))
    }

    pub fn mark_delete(&self, rid: Rid) -> Result<(), TableHeapError> {
        let page_ptr = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let mut page = page_ptr.write();
            self.page_manager.mark_delete(&mut page, rid.slot)
        };
        self.buffer_pool.unpin_page(rid.page_id, result.is_ok());
        result.map_err(|_| TableHeapError::TupleNotFound(rid))
    }

    /// Iterate every live tuple in chain order.
    pub fn iter(&self) -> TableIterator<'_> {
        TableIterator {
            heap: self,
            page_id: self.first_page_id(),
            slot: 0,
        }
    }
}

/// Pull-model iterator over `(Rid, tuple bytes)`. Pages are latched only
/// while a record is copied out.
pub struct TableIterator<'a> {
    heap: &'a TableHeap,
    page_id: PageId,
    slot: u32,
}

impl Iterator for TableIterator<'_> {
    type Item = (Rid, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        while self.page_id != INVALID_PAGE_ID {
            let page_ptr = match self.heap.buffer_pool.fetch_page(self.page_id) {
                Ok(ptr) => ptr,
                Err(_) => return None,
            };

            let (found, next_page_id, record_count) = {
                let page = page_ptr.read();
                let count = self.heap.page_manager.record_count(&page);
                let mut found = None;
                while self.slot < count {
                    let slot = self.slot;
                    self.slot += 1;
                    if let Ok(data) = self.heap.page_manager.get_record(&page, slot) {
                        found = Some((Rid::new(self.page_id, slot), data));
                        break;
                    }
                }
                (found, self.heap.page_manager.next_page_id(&page), count)
            };
            self.heap.buffer_pool.unpin_page(self.page_id, false);

            if let Some(item) = found {
                return Some(item);
            }
            if self.slot >= record_count {
                self.page_id = next_page_id;
                self.slot = 0;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    fn test_heap() -> (TableHeap, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(file.path()).unwrap());
        let buffer_pool = Arc::new(BufferPoolManager::new(16, disk, None));
        (TableHeap::new(buffer_pool), file)
    }

    #[test]
    fn test_insert_and_get() {
        let (heap, _file) = test_heap();

        let rid = heap.insert_tuple(b"hello").unwrap();
        assert_eq!(heap.get_tuple(rid).unwrap(), b"hello");
    }

    #[test]
    fn test_mark_delete_hides_tuple() {
        let (heap, _file) = test_heap();

        let rid = heap.insert_tuple(b"hello").unwrap();
        heap.mark_delete(rid).unwrap();
        assert!(heap.get_tuple(rid).is_err());
    }

    #[test]
    fn test_iterator_spans_pages() {
        let (heap, _file) = test_heap();

        // Large tuples force the heap onto several chained pages.
        let payload = vec![7u8; 3000];
        let mut rids = Vec::new();
        for _ in 0..10 {
            rids.push(heap.insert_tuple(&payload).unwrap());
        }

        let seen: Vec<Rid> = heap.iter().map(|(rid, _)| rid).collect();
        assert_eq!(seen, rids);
        assert!(heap.iter().all(|(_, data)| data == payload));
    }

    #[test]
    fn test_iterator_skips_deleted() {
        let (heap, _file) = test_heap();

        let a = heap.insert_tuple(b"a").unwrap();
        let b = heap.insert_tuple(b"b").unwrap();
        let c = heap.insert_tuple(b"c").unwrap();
        heap.mark_delete(b).unwrap();

        let seen: Vec<Rid> = heap.iter().map(|(rid, _)| rid).collect();
        assert_eq!(seen, vec![a, c]);
    }
}
