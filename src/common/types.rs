use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Page size in bytes (8KB)
pub const PAGE_SIZE: usize = 8192;

/// Page ID type. Ids are non-negative; -1 marks the absence of a page.
pub type PageId = i32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = -1;

/// Page 0 is reserved for the header page (index name -> root page id records)
pub const HEADER_PAGE_ID: PageId = 0;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// Transaction ID type
pub type TxnId = u32;

/// LSN (Log Sequence Number) type
pub type Lsn = u64;

/// Record ID: physical address of a tuple as (page, slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

/// An in-memory page image. The surrounding `RwLock` doubles as the page
/// latch: readers crab with read guards, writers with write guards.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }

    pub fn reset(&mut self, page_id: PageId) {
        self.data.fill(0);
        self.page_id = page_id;
        self.lsn = 0;
    }
}

/// Smart pointer to a page
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned page-latch guards, held across calls during latch crabbing.
pub type PageReadGuard = parking_lot::lock_api::ArcRwLockReadGuard<parking_lot::RawRwLock, Page>;
pub type PageWriteGuard = parking_lot::lock_api::ArcRwLockWriteGuard<parking_lot::RawRwLock, Page>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_reset_clears_contents() {
        let mut page = Page::new(3);
        page.data[0] = 0xab;
        page.lsn = 17;

        page.reset(INVALID_PAGE_ID);
        assert_eq!(page.page_id, INVALID_PAGE_ID);
        assert_eq!(page.lsn, 0);
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rid_display() {
        let rid = Rid::new(4, 9);
        assert_eq!(rid.to_string(), "(4, 9)");
        assert_eq!(rid, Rid::new(4, 9));
    }
}
