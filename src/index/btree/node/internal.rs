use std::cmp::Ordering;
use std::marker::PhantomData;

use crate::common::types::{Page, PageId};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::{KeyComparator, StorageCodec};
use crate::index::btree::node::{self, NodeType, NODE_HEADER_SIZE};
use crate::storage::buffer::BufferPoolManager;

fn pair_len<K: StorageCodec>() -> usize {
    K::ENCODED_LEN + PageId::ENCODED_LEN
}

fn pair_offset<K: StorageCodec>(index: usize) -> usize {
    NODE_HEADER_SIZE + index * pair_len::<K>()
}

/// Read-only view over an internal page: `(separator, child)` pairs where
/// the key at index 0 is unused and child 0 is the leftmost subtree. The
/// separator at index i means "keys in child i are >= that separator".
pub struct InternalRef<'a, K> {
    page: &'a Page,
    _marker: PhantomData<K>,
}

impl<'a, K: StorageCodec> InternalRef<'a, K> {
    pub fn new(page: &'a Page) -> Self {
        debug_assert_eq!(node::node_type(page), NodeType::Internal);
        Self {
            page,
            _marker: PhantomData,
        }
    }

    pub fn size(&self) -> usize {
        node::size(self.page)
    }

    pub fn max_size(&self) -> usize {
        node::max_size(self.page)
    }

    pub fn min_size(&self) -> usize {
        node::min_size(self.page)
    }

    pub fn key_at(&self, index: usize) -> K {
        let offset = pair_offset::<K>(index);
        K::decode_from(&self.page.data[offset..offset + K::ENCODED_LEN])
    }

    pub fn value_at(&self, index: usize) -> PageId {
        let offset = pair_offset::<K>(index) + K::ENCODED_LEN;
        PageId::decode_from(&self.page.data[offset..offset + PageId::ENCODED_LEN])
    }

    /// The child to descend into for `key`: the rightmost child whose
    /// separator is <= key. Separators start at index 1.
    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> PageId {
        let size = self.size();
        for i in 1..size {
            if comparator.compare(key, &self.key_at(i)) == Ordering::Less {
                return self.value_at(i - 1);
            }
        }
        self.value_at(size - 1)
    }

    /// Exact separator match among indices 1..size.
    pub fn key_index<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> Option<usize> {
        (1..self.size()).find(|&i| comparator.compare(&self.key_at(i), key) == Ordering::Equal)
    }

    /// Position of the child pointer equal to `child`, if present.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }
}

/// Mutable view over an internal page. Moves that relocate children update
/// the children's parent pointers through the buffer pool.
pub struct InternalMut<'a, K> {
    page: &'a mut Page,
    _marker: PhantomData<K>,
}

impl<'a, K: StorageCodec> InternalMut<'a, K> {
    pub fn new(page: &'a mut Page) -> Self {
        debug_assert_eq!(node::node_type(page), NodeType::Internal);
        Self {
            page,
            _marker: PhantomData,
        }
    }

    pub fn init(page: &'a mut Page, page_id: PageId, parent_page_id: PageId, max_size: usize) -> Self {
        node::init_header(page, NodeType::Internal, page_id, parent_page_id, max_size);
        Self {
            page,
            _marker: PhantomData,
        }
    }

    fn as_ref(&self) -> InternalRef<'_, K> {
        InternalRef::new(&*self.page)
    }

    pub fn size(&self) -> usize {
        self.as_ref().size()
    }

    pub fn key_at(&self, index: usize) -> K {
        self.as_ref().key_at(index)
    }

    pub fn value_at(&self, index: usize) -> PageId {
        self.as_ref().value_at(index)
    }

    pub fn key_index<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> Option<usize> {
        self.as_ref().key_index(key, comparator)
    }

    pub fn value_index(&self, child: PageId) -> Option<usize> {
        self.as_ref().value_index(child)
    }

    pub fn set_key_at(&mut self, index: usize, key: &K) {
        let offset = pair_offset::<K>(index);
        key.encode_into(&mut self.page.data[offset..offset + K::ENCODED_LEN]);
    }

    fn write_pair(&mut self, index: usize, key: &K, child: PageId) {
        self.set_key_at(index, key);
        let offset = pair_offset::<K>(index) + K::ENCODED_LEN;
        child.encode_into(&mut self.page.data[offset..offset + PageId::ENCODED_LEN]);
    }

    fn insert_pair_at(&mut self, index: usize, key: &K, child: PageId) {
        let size = self.size();
        let start = pair_offset::<K>(index);
        let end = pair_offset::<K>(size);
        self.page.data.copy_within(start..end, start + pair_len::<K>());
        self.write_pair(index, key, child);
        node::set_size(self.page, size + 1);
    }

    /// Remove the pair at `index`, shifting the rest left.
    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        let start = pair_offset::<K>(index + 1);
        let end = pair_offset::<K>(size);
        self.page.data.copy_within(start..end, start - pair_len::<K>());
        node::set_size(self.page, size - 1);
    }

    /// Fill a fresh root after the old root split: child 0 is the old root,
    /// child 1 the new sibling. The key at slot 0 stays zeroed (unused).
    pub fn populate_new_root(&mut self, old_child: PageId, key: &K, new_child: PageId) {
        let offset = pair_offset::<K>(0);
        self.page.data[offset..offset + K::ENCODED_LEN].fill(0);
        old_child.encode_into(
            &mut self.page.data[offset + K::ENCODED_LEN..offset + pair_len::<K>()],
        );
        self.write_pair(1, key, new_child);
        node::set_size(self.page, 2);
    }

    /// Insert `(new_key, new_child)` immediately after the pair pointing at
    /// `old_child`; returns the new size.
    pub fn insert_node_after(&mut self, old_child: PageId, new_key: &K, new_child: PageId) -> usize {
        let index = self.value_index(old_child).map(|i| i + 1).unwrap_or(self.size());
        self.insert_pair_at(index, new_key, new_child);
        self.size()
    }

    /// Split support: keep the first half, move the rest to the (empty)
    /// recipient and adopt the moved children.
    pub fn move_half_to(
        &mut self,
        recipient: &mut InternalMut<'_, K>,
        buffer_pool: &BufferPoolManager,
    ) -> Result<(), BTreeError> {
        let size = self.size();
        let split_from = size / 2;
        let recipient_id = node::stored_page_id(recipient.page);
        for i in split_from..size {
            let key = self.key_at(i);
            let child = self.value_at(i);
            recipient.write_pair(i - split_from, &key, child);
            adopt_child(buffer_pool, child, recipient_id)?;
        }
        node::set_size(recipient.page, size - split_from);
        node::set_size(self.page, split_from);
        Ok(())
    }

    /// Merge support: prepend the parent separator onto our slot-0 key,
    /// append everything to the recipient and adopt the moved children.
    pub fn move_all_to(
        &mut self,
        recipient: &mut InternalMut<'_, K>,
        middle_key: &K,
        buffer_pool: &BufferPoolManager,
    ) -> Result<(), BTreeError> {
        self.set_key_at(0, middle_key);
        let recipient_size = recipient.size();
        let size = self.size();
        let recipient_id = node::stored_page_id(recipient.page);
        for i in 0..size {
            let key = self.key_at(i);
            let child = self.value_at(i);
            recipient.write_pair(recipient_size + i, &key, child);
            adopt_child(buffer_pool, child, recipient_id)?;
        }
        node::set_size(recipient.page, recipient_size + size);
        node::set_size(self.page, 0);
        Ok(())
    }

    /// Redistribution from the right sibling: our first pair moves to the
    /// recipient's end, keyed by the parent separator.
    pub fn move_first_to_end_of(
        &mut self,
        recipient: &mut InternalMut<'_, K>,
        middle_key: &K,
        buffer_pool: &BufferPoolManager,
    ) -> Result<(), BTreeError> {
        let child = self.value_at(0);
        self.remove(0);
        let size = recipient.size();
        recipient.write_pair(size, middle_key, child);
        node::set_size(recipient.page, size + 1);
        adopt_child(buffer_pool, child, node::stored_page_id(recipient.page))
    }

    /// Redistribution from the left sibling: our last pair moves to the
    /// recipient's front; the recipient's old dummy slot takes the parent
    /// separator.
    pub fn move_last_to_front_of(
        &mut self,
        recipient: &mut InternalMut<'_, K>,
        middle_key: &K,
        buffer_pool: &BufferPoolManager,
    ) -> Result<(), BTreeError> {
        let last = self.size() - 1;
        let key = self.key_at(last);
        let child = self.value_at(last);
        self.remove(last);
        recipient.set_key_at(0, middle_key);
        recipient.insert_pair_at(0, &key, child);
        adopt_child(buffer_pool, child, node::stored_page_id(recipient.page))
    }
}

/// Point a relocated child at its new parent and persist the change. The
/// child is latched transiently; callers never hold its latch here.
fn adopt_child(
    buffer_pool: &BufferPoolManager,
    child: PageId,
    new_parent: PageId,
) -> Result<(), BTreeError> {
    let page_ptr = buffer_pool.fetch_page(child)?;
    {
        let mut page = page_ptr.write();
        node::set_parent_page_id(&mut page, new_parent);
    }
    buffer_pool.unpin_page(child, true);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;
    use crate::index::btree::key::{GenericComparator, Key8};

    type TestInternal<'a> = InternalMut<'a, Key8>;

    #[test]
    fn test_populate_new_root() {
        let mut page = Page::new(3);
        let mut internal = TestInternal::init(&mut page, 3, INVALID_PAGE_ID, 8);

        internal.populate_new_root(1, &Key8::from_i64(10), 2);
        assert_eq!(internal.size(), 2);
        assert_eq!(internal.value_at(0), 1);
        assert_eq!(internal.value_at(1), 2);
        assert_eq!(internal.key_at(1).to_i64(), 10);
    }

    #[test]
    fn test_lookup_routes_by_separator() {
        let cmp = GenericComparator::<8>;
        let mut page = Page::new(3);
        let mut internal = TestInternal::init(&mut page, 3, INVALID_PAGE_ID, 8);
        internal.populate_new_root(1, &Key8::from_i64(10), 2);
        internal.insert_node_after(2, &Key8::from_i64(20), 4);

        assert_eq!(internal.as_ref().lookup(&Key8::from_i64(5), &cmp), 1);
        assert_eq!(internal.as_ref().lookup(&Key8::from_i64(10), &cmp), 2);
        assert_eq!(internal.as_ref().lookup(&Key8::from_i64(15), &cmp), 2);
        assert_eq!(internal.as_ref().lookup(&Key8::from_i64(25), &cmp), 4);
    }

    #[test]
    fn test_insert_node_after_ordering() {
        let mut page = Page::new(3);
        let mut internal = TestInternal::init(&mut page, 3, INVALID_PAGE_ID, 8);
        internal.populate_new_root(1, &Key8::from_i64(10), 2);

        let size = internal.insert_node_after(1, &Key8::from_i64(5), 7);
        assert_eq!(size, 3);
        assert_eq!(internal.value_at(0), 1);
        assert_eq!(internal.value_at(1), 7);
        assert_eq!(internal.key_at(1).to_i64(), 5);
        assert_eq!(internal.value_at(2), 2);
    }

    #[test]
    fn test_value_index_and_remove() {
        let mut page = Page::new(3);
        let mut internal = TestInternal::init(&mut page, 3, INVALID_PAGE_ID, 8);
        internal.populate_new_root(1, &Key8::from_i64(10), 2);
        internal.insert_node_after(2, &Key8::from_i64(20), 4);

        assert_eq!(internal.value_index(2), Some(1));
        assert_eq!(internal.value_index(99), None);

        internal.remove(1);
        assert_eq!(internal.size(), 2);
        assert_eq!(internal.value_at(1), 4);
        assert_eq!(internal.key_at(1).to_i64(), 20);
    }
}
