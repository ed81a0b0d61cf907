use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::{debug, trace};
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;
use crate::transaction::wal::LogManager;

/// Per-frame bookkeeping, guarded by the pool latch. The page bytes live in
/// the matching `PagePtr`, whose RwLock is the page latch and is only taken
/// while the frame is pinned (or, during eviction, while it provably cannot
/// be).
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    frames: Vec<FrameMeta>,
}

/// Fixed-size buffer pool over the paged disk image.
///
/// One coarse latch guards the page table, the free list, the replacer and
/// all pin counts / dirty bits. Disk I/O for miss handling and eviction
/// happens under that latch.
pub struct BufferPoolManager {
    pool_size: usize,
    pages: Vec<PagePtr>,
    latch: Mutex<PoolState>,
    replacer: LruReplacer,
    disk_manager: Arc<DiskManager>,
    #[allow(dead_code)]
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let mut pages = Vec::with_capacity(pool_size);
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for frame_id in 0..pool_size {
            pages.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            frames.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            pages,
            latch: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                frames,
            }),
            replacer: LruReplacer::new(pool_size),
            disk_manager,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Fetch a page, pinning its frame. Fails with `PoolExhausted` only when
    /// every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidOperation(format!(
                "cannot fetch page {}",
                page_id
            )));
        }

        let mut state = self.latch.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.frames[frame_id].pin_count += 1;
            self.replacer.pin(frame_id);
            return Ok(self.pages[frame_id].clone());
        }

        let frame_id = self.find_replace(&mut state)?;

        {
            let mut page = self.pages[frame_id].write();
            page.reset(page_id);
            self.disk_manager.read_page(page_id, &mut page.data)?;
        }

        state.frames[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };
        state.page_table.insert(page_id, frame_id);

        Ok(self.pages[frame_id].clone())
    }

    /// Allocate a fresh page on disk and pin it in a frame, zeroed and dirty.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.latch.lock();

        let frame_id = self.find_replace(&mut state)?;
        let page_id = self.disk_manager.allocate_page()?;

        {
            let mut page = self.pages[frame_id].write();
            page.reset(page_id);
        }

        state.frames[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: true,
        };
        state.page_table.insert(page_id, frame_id);

        trace!("new page {} in frame {}", page_id, frame_id);
        Ok((self.pages[frame_id].clone(), page_id))
    }

    /// Drop one pin. The dirty flag is OR'd in, never cleared here. Returns
    /// false if the page is unmapped or already unpinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.latch.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return false,
        };

        let frame = &mut state.frames[frame_id];
        if frame.pin_count == 0 {
            return false;
        }

        frame.pin_count -= 1;
        if is_dirty {
            frame.is_dirty = true;
        }

        if frame.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Write a mapped page back to disk and clear its dirty bit. Pin state
    /// is unchanged. Returns Ok(false) when the page is not in the pool.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut state = self.latch.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(false),
        };

        {
            let page = self.pages[frame_id].read();
            self.disk_manager.write_page(page_id, &page.data)?;
        }
        state.frames[frame_id].is_dirty = false;
        Ok(true)
    }

    /// Flush every dirty mapped page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut state = self.latch.lock();

        for frame_id in 0..self.pool_size {
            let frame = &state.frames[frame_id];
            if frame.page_id == INVALID_PAGE_ID || !frame.is_dirty {
                continue;
            }
            let page_id = frame.page_id;
            {
                let page = self.pages[frame_id].read();
                self.disk_manager.write_page(page_id, &page.data)?;
            }
            state.frames[frame_id].is_dirty = false;
        }
        Ok(())
    }

    /// Remove a page from the pool and deallocate it on disk. An unmapped
    /// page is deallocated and reported as success; a pinned page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut state = self.latch.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => {
                self.disk_manager.deallocate_page(page_id);
                return Ok(true);
            }
        };

        if state.frames[frame_id].pin_count > 0 {
            return Ok(false);
        }

        state.page_table.remove(&page_id);
        self.replacer.pin(frame_id);
        state.frames[frame_id] = FrameMeta {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        };
        {
            let mut page = self.pages[frame_id].write();
            page.reset(INVALID_PAGE_ID);
        }
        state.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);
        Ok(true)
    }

    /// Pick a frame for an incoming page: the free list is always drained
    /// first, then the replacer supplies a victim. Evicted dirty pages are
    /// written back before the frame is handed out.
    fn find_replace(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = match self.replacer.victim() {
            Some(id) => id,
            None => return Err(BufferPoolError::PoolExhausted),
        };

        let victim_page_id = state.frames[frame_id].page_id;
        if victim_page_id != INVALID_PAGE_ID {
            if state.frames[frame_id].is_dirty {
                debug!("evicting dirty page {} from frame {}", victim_page_id, frame_id);
                let page = self.pages[frame_id].read();
                self.disk_manager.write_page(victim_page_id, &page.data)?;
            }
            state.page_table.remove(&victim_page_id);
        }

        Ok(frame_id)
    }
}
