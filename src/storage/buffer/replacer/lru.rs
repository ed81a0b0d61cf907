use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU page replacement policy over unpinned frames.
///
/// The insertion-order map gives O(1) for every operation: newly unpinned
/// frames enter at the most-recently-unused end, victims leave from the
/// least-recently-unused end, and pinning removes by key.
pub struct LruReplacer {
    inner: Mutex<LruInner>,
}

struct LruInner {
    // front = least recently unused, back = most recently unused
    entries: LinkedHashMap<FrameId, ()>,
    capacity: usize,
}

impl LruReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                entries: LinkedHashMap::with_capacity(pool_size),
                capacity: pool_size,
            }),
        }
    }

    /// Remove and return the least recently unused frame, if any.
    pub fn victim(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        inner.entries.pop_front().map(|(frame_id, ())| frame_id)
    }

    /// A frame is back in use: make it ineligible for eviction.
    pub fn pin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        inner.entries.remove(&frame_id);
    }

    /// A frame's pin count dropped to zero: enqueue it as the most recently
    /// unused candidate. No-op if it is already a candidate.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&frame_id) {
            return;
        }
        if inner.entries.len() >= inner.capacity {
            // Drop the oldest candidate to stay within capacity.
            inner.entries.pop_front();
        }
        inner.entries.insert(frame_id, ());
    }

    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }
}
