use std::marker::PhantomData;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{
    PageId, PageReadGuard, PageWriteGuard, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::{KeyComparator, StorageCodec};
use crate::index::btree::node::internal::InternalRef;
use crate::index::btree::node::{self, NodeType, OpType, NODE_HEADER_SIZE};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::header_page;

/// A write-latched, pinned page owned by a descent.
pub(crate) struct WriteLatch {
    pub page_id: PageId,
    pub guard: PageWriteGuard,
}

/// The set of ancestor latches a write descent still holds. Ancestors are
/// released as soon as a node proves safe for the operation; whatever
/// remains is exactly the chain a split or merge may need to touch.
pub(crate) struct Context {
    pub latched: Vec<WriteLatch>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            latched: Vec::new(),
        }
    }

    pub fn push(&mut self, latch: WriteLatch) {
        self.latched.push(latch);
    }

    pub fn pop(&mut self) -> Option<WriteLatch> {
        self.latched.pop()
    }

    pub fn last_mut(&mut self) -> Option<&mut WriteLatch> {
        self.latched.last_mut()
    }

    /// Unlatch and unpin every held ancestor, top of tree first.
    pub fn release_all(&mut self, buffer_pool: &BufferPoolManager) {
        for latch in self.latched.drain(..) {
            let page_id = latch.page_id;
            drop(latch.guard);
            buffer_pool.unpin_page(page_id, true);
        }
    }
}

/// How a root id change reaches the header page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RootIdChange {
    /// Root moved or was dropped: rewrite the existing record.
    Update,
    /// First root of a brand-new index: add the record.
    FirstInsert,
    /// Root promotion: upsert the record.
    NewRoot,
}

/// Concurrent B+tree over the buffer pool, generic over fixed-width keys,
/// values and a user comparator. Node pages are reached through pins and
/// page latches; descents crab per `OpType`.
pub struct BPlusTree<K, V, C> {
    pub(crate) index_name: String,
    pub(crate) root_page_id: Mutex<PageId>,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) comparator: C,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    pub(crate) _marker: PhantomData<(K, V)>,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: StorageCodec,
    V: StorageCodec,
    C: KeyComparator<K>,
{
    /// Open the named index, picking up a root recorded in the header page
    /// by an earlier run.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        let leaf_capacity = (PAGE_SIZE - NODE_HEADER_SIZE) / (K::ENCODED_LEN + V::ENCODED_LEN);
        let internal_capacity =
            (PAGE_SIZE - NODE_HEADER_SIZE) / (K::ENCODED_LEN + PageId::ENCODED_LEN);
        if leaf_max_size < 2 || leaf_max_size > leaf_capacity {
            return Err(BTreeError::InvalidOrder(format!(
                "leaf max size {} out of range 2..={}",
                leaf_max_size, leaf_capacity
            )));
        }
        // An internal node holds max_size + 1 pairs for the instant
        // between overflow and split, so keep one slot of headroom.
        if internal_max_size < 3 || internal_max_size + 1 > internal_capacity {
            return Err(BTreeError::InvalidOrder(format!(
                "internal max size {} out of range 3..={}",
                internal_max_size,
                internal_capacity - 1
            )));
        }

        let index_name = index_name.into();
        let root_page_id = {
            let header_ptr = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
            let root = {
                let header = header_ptr.read();
                header_page::get_root_id(&header, &index_name)
            };
            buffer_pool.unpin_page(HEADER_PAGE_ID, false);
            root.unwrap_or(INVALID_PAGE_ID)
        };

        Ok(Self {
            index_name,
            root_page_id: Mutex::new(root_page_id),
            buffer_pool,
            comparator,
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    /// Open the named index with node sizes derived from the page size.
    pub fn with_page_capacity(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        comparator: C,
    ) -> Result<Self, BTreeError> {
        let leaf_max = (PAGE_SIZE - NODE_HEADER_SIZE) / (K::ENCODED_LEN + V::ENCODED_LEN);
        let internal_max =
            (PAGE_SIZE - NODE_HEADER_SIZE) / (K::ENCODED_LEN + PageId::ENCODED_LEN) - 1;
        Self::new(index_name, buffer_pool, comparator, leaf_max, internal_max)
    }

    pub fn name(&self) -> &str {
        &self.index_name
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool
    }

    /// Number of levels from the root down to a leaf; 0 for an empty tree.
    pub fn height(&self) -> Result<usize, BTreeError> {
        let mut levels = 0;
        let mut page_id = self.root_page_id();
        while page_id != INVALID_PAGE_ID {
            let page_ptr = self.buffer_pool.fetch_page(page_id)?;
            let child = {
                let page = page_ptr.read();
                match node::node_type(&page) {
                    NodeType::Internal => InternalRef::<K>::new(&page).value_at(0),
                    _ => INVALID_PAGE_ID,
                }
            };
            self.buffer_pool.unpin_page(page_id, false);
            levels += 1;
            page_id = child;
        }
        Ok(levels)
    }

    /// Read-crabbing descent to the leaf for `key` (leftmost leaf when the
    /// key is absent). The child's read latch is taken before the parent's
    /// is dropped. Returns the pinned, read-latched leaf.
    pub(crate) fn find_leaf_read(
        &self,
        key: Option<&K>,
    ) -> Result<Option<(PageId, PageReadGuard)>, BTreeError> {
        'restart: loop {
            let root_id = self.root_page_id();
            if root_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let root_ptr = self.buffer_pool.fetch_page(root_id)?;
            let guard = root_ptr.read_arc();
            if self.root_page_id() != root_id || !node::is_root(&guard) {
                // A promotion or root drop slipped in between; start over.
                drop(guard);
                self.buffer_pool.unpin_page(root_id, false);
                continue 'restart;
            }

            let mut page_id = root_id;
            let mut guard = guard;
            loop {
                if node::node_type(&guard) == NodeType::Leaf {
                    return Ok(Some((page_id, guard)));
                }
                let child_id = {
                    let internal = InternalRef::<K>::new(&guard);
                    match key {
                        Some(key) => internal.lookup(key, &self.comparator),
                        None => internal.value_at(0),
                    }
                };
                let child_ptr = match self.buffer_pool.fetch_page(child_id) {
                    Ok(ptr) => ptr,
                    Err(e) => {
                        drop(guard);
                        self.buffer_pool.unpin_page(page_id, false);
                        return Err(e.into());
                    }
                };
                let child_guard = child_ptr.read_arc();
                drop(guard);
                self.buffer_pool.unpin_page(page_id, false);
                page_id = child_id;
                guard = child_guard;
            }
        }
    }

    /// Write-crabbing descent: every node on the path is write-latched, and
    /// the retained ancestor set shrinks to the unsafe suffix of the path.
    /// Ancestors stay in `ctx`; the latched leaf is returned.
    pub(crate) fn find_leaf_write(
        &self,
        key: &K,
        op: OpType,
        ctx: &mut Context,
    ) -> Result<Option<WriteLatch>, BTreeError> {
        'restart: loop {
            let root_id = self.root_page_id();
            if root_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let root_ptr = self.buffer_pool.fetch_page(root_id)?;
            let guard = root_ptr.write_arc();
            if self.root_page_id() != root_id || !node::is_root(&guard) {
                drop(guard);
                self.buffer_pool.unpin_page(root_id, false);
                continue 'restart;
            }

            let mut current = WriteLatch {
                page_id: root_id,
                guard,
            };
            loop {
                if node::is_safe(&current.guard, op) {
                    ctx.release_all(&self.buffer_pool);
                }
                if node::node_type(&current.guard) == NodeType::Leaf {
                    return Ok(Some(current));
                }
                let child_id =
                    InternalRef::<K>::new(&current.guard).lookup(key, &self.comparator);
                let child_ptr = match self.buffer_pool.fetch_page(child_id) {
                    Ok(ptr) => ptr,
                    Err(e) => {
                        let page_id = current.page_id;
                        drop(current.guard);
                        self.buffer_pool.unpin_page(page_id, true);
                        ctx.release_all(&self.buffer_pool);
                        return Err(e.into());
                    }
                };
                let child_guard = child_ptr.write_arc();
                ctx.push(current);
                current = WriteLatch {
                    page_id: child_id,
                    guard: child_guard,
                };
            }
        }
    }

    /// Release a write-latched page and unpin it dirty.
    pub(crate) fn release_write(&self, latch: WriteLatch) {
        let page_id = latch.page_id;
        drop(latch.guard);
        self.buffer_pool.unpin_page(page_id, true);
    }

    /// Persist the current root page id into the header page.
    pub(crate) fn update_root_page_id(&self, change: RootIdChange) -> Result<(), BTreeError> {
        let root_id = self.root_page_id();
        let header_ptr = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let ok = {
            let mut header = header_ptr.write();
            match change {
                // A name can reappear after the last key was removed, so
                // first creation still falls back to rewriting the record.
                RootIdChange::FirstInsert => {
                    header_page::insert_record(&mut header, &self.index_name, root_id)
                        || header_page::update_record(&mut header, &self.index_name, root_id)
                }
                RootIdChange::Update | RootIdChange::NewRoot => {
                    header_page::update_record(&mut header, &self.index_name, root_id)
                        || header_page::insert_record(&mut header, &self.index_name, root_id)
                }
            }
        };
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true);
        if ok {
            Ok(())
        } else {
            Err(BTreeError::RootNotPersisted(self.index_name.clone()))
        }
    }
}
