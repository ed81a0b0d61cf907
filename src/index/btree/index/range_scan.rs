use crate::common::types::{PageId, PagePtr, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::{KeyComparator, StorageCodec};
use crate::index::btree::node::internal::InternalRef;
use crate::index::btree::node::leaf::LeafRef;
use crate::index::btree::node::{self, NodeType};
use super::base::BPlusTree;

impl<K, V, C> BPlusTree<K, V, C>
where
    K: StorageCodec,
    V: StorageCodec,
    C: KeyComparator<K>,
{
    /// Iterator positioned on the first entry of the leftmost leaf.
    pub fn begin(&self) -> Result<TreeIterator<'_, K, V, C>, BTreeError> {
        match self.find_leaf_read(None)? {
            Some((page_id, guard)) => {
                drop(guard);
                // The pin taken by the descent now belongs to the iterator.
                Ok(TreeIterator::new(self, page_id, 0))
            }
            None => Ok(TreeIterator::exhausted(self)),
        }
    }

    /// Iterator positioned on the first entry >= `key`.
    pub fn begin_at(&self, key: &K) -> Result<TreeIterator<'_, K, V, C>, BTreeError> {
        match self.find_leaf_read(Some(key))? {
            Some((page_id, guard)) => {
                let index = LeafRef::<K, V>::new(&guard).key_index(key, &self.comparator);
                drop(guard);
                Ok(TreeIterator::new(self, page_id, index))
            }
            None => Ok(TreeIterator::exhausted(self)),
        }
    }

    /// The past-the-end position: rightmost leaf, index == size.
    pub fn end(&self) -> Result<TreeIterator<'_, K, V, C>, BTreeError> {
        'restart: loop {
            let root_id = self.root_page_id();
            if root_id == INVALID_PAGE_ID {
                return Ok(TreeIterator::exhausted(self));
            }
            let root_ptr = self.buffer_pool.fetch_page(root_id)?;
            let guard = root_ptr.read_arc();
            if self.root_page_id() != root_id || !node::is_root(&guard) {
                drop(guard);
                self.buffer_pool.unpin_page(root_id, false);
                continue 'restart;
            }

            let mut page_id = root_id;
            let mut guard = guard;
            loop {
                if node::node_type(&guard) == NodeType::Leaf {
                    let index = node::size(&guard);
                    drop(guard);
                    return Ok(TreeIterator::new(self, page_id, index));
                }
                let internal = InternalRef::<K>::new(&guard);
                let child_id = internal.value_at(internal.size() - 1);
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
}

/// Leaf-chain cursor. Holds a pin on its current leaf (dropping the
/// iterator unpins it) and takes the leaf's read latch only while a pair is
/// copied out. Position equality is `(page_id, index)`.
pub struct TreeIterator<'a, K, V, C> {
    tree: &'a BPlusTree<K, V, C>,
    page: Option<PagePtr>,
    page_id: PageId,
    index: usize,
}

impl<'a, K, V, C> TreeIterator<'a, K, V, C>
where
    K: StorageCodec,
    V: StorageCodec,
    C: KeyComparator<K>,
{
    fn new(tree: &'a BPlusTree<K, V, C>, page_id: PageId, index: usize) -> Self {
        let page = tree.buffer_pool.fetch_page(page_id).ok();
        // The descent's pin is released now that the iterator took its own.
        tree.buffer_pool.unpin_page(page_id, false);
        Self {
            tree,
            page,
            page_id,
            index,
        }
    }

    fn exhausted(tree: &'a BPlusTree<K, V, C>) -> Self {
        Self {
            tree,
            page: None,
            page_id: INVALID_PAGE_ID,
            index: 0,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// True on the past-the-end position of the rightmost leaf (and on an
    /// empty tree).
    pub fn is_end(&self) -> bool {
        let Some(page) = &self.page else {
            return true;
        };
        let guard = page.read();
        let leaf = LeafRef::<K, V>::new(&guard);
        self.index >= leaf.size() && leaf.next_page_id() == INVALID_PAGE_ID
    }

    /// The entry under the cursor, unless at end.
    pub fn current(&self) -> Option<(K, V)> {
        let page = self.page.as_ref()?;
        let guard = page.read();
        let leaf = LeafRef::<K, V>::new(&guard);
        if self.index < leaf.size() {
            Some((leaf.key_at(self.index), leaf.value_at(self.index)))
        } else {
            None
        }
    }

    fn advance_page(&mut self, next_page_id: PageId) -> bool {
        match self.tree.buffer_pool.fetch_page(next_page_id) {
            Ok(next_ptr) => {
                self.tree.buffer_pool.unpin_page(self.page_id, false);
                self.page = Some(next_ptr);
                self.page_id = next_page_id;
                self.index = 0;
                true
            }
            Err(_) => false,
        }
    }
}

impl<K, V, C> Iterator for TreeIterator<'_, K, V, C>
where
    K: StorageCodec,
    V: StorageCodec,
    C: KeyComparator<K>,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            let page = self.page.as_ref()?;
            let (item, next_page_id) = {
                let guard = page.read();
                let leaf = LeafRef::<K, V>::new(&guard);
                let item = if self.index < leaf.size() {
                    Some((leaf.key_at(self.index), leaf.value_at(self.index)))
                } else {
                    None
                };
                (item, leaf.next_page_id())
            };

            if let Some(item) = item {
                self.index += 1;
                return Some(item);
            }
            if next_page_id == INVALID_PAGE_ID {
                return None;
            }
            if !self.advance_page(next_page_id) {
                return None;
            }
        }
    }
}

impl<K, V, C> PartialEq for TreeIterator<'_, K, V, C> {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id && self.index == other.index
    }
}

impl<K, V, C> Drop for TreeIterator<'_, K, V, C> {
    fn drop(&mut self) {
        if self.page.take().is_some() {
            self.tree.buffer_pool.unpin_page(self.page_id, false);
        }
    }
}
