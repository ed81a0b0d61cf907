use std::cmp::Ordering;
use std::marker::PhantomData;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID};
use crate::index::btree::key::{KeyComparator, StorageCodec};
use crate::index::btree::node::{self, NodeType, NODE_HEADER_SIZE};

fn pair_len<K: StorageCodec, V: StorageCodec>() -> usize {
    K::ENCODED_LEN + V::ENCODED_LEN
}

fn pair_offset<K: StorageCodec, V: StorageCodec>(index: usize) -> usize {
    NODE_HEADER_SIZE + index * pair_len::<K, V>()
}

/// Read-only view over a leaf page: sorted `(key, rid)` pairs plus the
/// sibling link for range scans.
pub struct LeafRef<'a, K, V> {
    page: &'a Page,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: StorageCodec, V: StorageCodec> LeafRef<'a, K, V> {
    pub fn new(page: &'a Page) -> Self {
        debug_assert_eq!(node::node_type(page), NodeType::Leaf);
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

    pub fn next_page_id(&self) -> PageId {
        node::next_page_id(self.page)
    }

    pub fn parent_page_id(&self) -> PageId {
        node::parent_page_id(self.page)
    }

    pub fn key_at(&self, index: usize) -> K {
        let offset = pair_offset::<K, V>(index);
        K::decode_from(&self.page.data[offset..offset + K::ENCODED_LEN])
    }

    pub fn value_at(&self, index: usize) -> V {
        let offset = pair_offset::<K, V>(index) + K::ENCODED_LEN;
        V::decode_from(&self.page.data[offset..offset + V::ENCODED_LEN])
    }

    /// Index of the first entry whose key is >= `key` (== size when all
    /// keys are smaller). Binary search over the on-page array.
    pub fn key_index<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> usize {
        let mut low = 0;
        let mut high = self.size();
        while low < high {
            let mid = (low + high) / 2;
            match comparator.compare(&self.key_at(mid), key) {
                Ordering::Less => low = mid + 1,
                _ => high = mid,
            }
        }
        low
    }

    /// Exact-match lookup.
    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> Option<V> {
        let index = self.key_index(key, comparator);
        if index < self.size() && comparator.compare(&self.key_at(index), key) == Ordering::Equal {
            Some(self.value_at(index))
        } else {
            None
        }
    }
}

/// Mutable view over a leaf page.
pub struct LeafMut<'a, K, V> {
    page: &'a mut Page,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: StorageCodec, V: StorageCodec> LeafMut<'a, K, V> {
    pub fn new(page: &'a mut Page) -> Self {
        debug_assert_eq!(node::node_type(page), NodeType::Leaf);
        Self {
            page,
            _marker: PhantomData,
        }
    }

    /// Format a fresh leaf node onto `page`.
    pub fn init(page: &'a mut Page, page_id: PageId, parent_page_id: PageId, max_size: usize) -> Self {
        node::init_header(page, NodeType::Leaf, page_id, parent_page_id, max_size);
        Self {
            page,
            _marker: PhantomData,
        }
    }

    fn as_ref(&self) -> LeafRef<'_, K, V> {
        LeafRef::new(&*self.page)
    }

    pub fn size(&self) -> usize {
        self.as_ref().size()
    }

    pub fn max_size(&self) -> usize {
        self.as_ref().max_size()
    }

    pub fn min_size(&self) -> usize {
        self.as_ref().min_size()
    }

    pub fn next_page_id(&self) -> PageId {
        self.as_ref().next_page_id()
    }

    pub fn key_at(&self, index: usize) -> K {
        self.as_ref().key_at(index)
    }

    pub fn value_at(&self, index: usize) -> V {
        self.as_ref().value_at(index)
    }

    pub fn key_index<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> usize {
        self.as_ref().key_index(key, comparator)
    }

    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> Option<V> {
        self.as_ref().lookup(key, comparator)
    }

    pub fn set_next_page_id(&mut self, next_page_id: PageId) {
        node::set_next_page_id(self.page, next_page_id);
    }

    pub fn set_parent_page_id(&mut self, parent_page_id: PageId) {
        node::set_parent_page_id(self.page, parent_page_id);
    }

    fn write_pair(&mut self, index: usize, key: &K, value: &V) {
        let offset = pair_offset::<K, V>(index);
        key.encode_into(&mut self.page.data[offset..offset + K::ENCODED_LEN]);
        value.encode_into(
            &mut self.page.data[offset + K::ENCODED_LEN..offset + pair_len::<K, V>()],
        );
    }

    fn insert_pair_at(&mut self, index: usize, key: &K, value: &V) {
        let size = self.size();
        let start = pair_offset::<K, V>(index);
        let end = pair_offset::<K, V>(size);
        self.page.data.copy_within(start..end, start + pair_len::<K, V>());
        self.write_pair(index, key, value);
        node::set_size(self.page, size + 1);
    }

    fn remove_pair_at(&mut self, index: usize) {
        let size = self.size();
        let start = pair_offset::<K, V>(index + 1);
        let end = pair_offset::<K, V>(size);
        self.page
            .data
            .copy_within(start..end, start - pair_len::<K, V>());
        node::set_size(self.page, size - 1);
    }

    /// Sorted insert; returns the new size. The caller has already ruled
    /// out duplicates.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: &K, value: &V, comparator: &C) -> usize {
        let index = self.key_index(key, comparator);
        self.insert_pair_at(index, key, value);
        self.size()
    }

    /// Remove the entry for `key`, returning the index it occupied.
    pub fn remove_and_delete_record<C: KeyComparator<K>>(
        &mut self,
        key: &K,
        comparator: &C,
    ) -> Option<usize> {
        let index = self.key_index(key, comparator);
        if index >= self.size()
            || comparator.compare(&self.key_at(index), key) != Ordering::Equal
        {
            return None;
        }
        self.remove_pair_at(index);
        Some(index)
    }

    /// Split support: keep the first `min_size` pairs, move the rest to the
    /// (empty) recipient. The sibling link is spliced by the caller.
    pub fn move_half_to(&mut self, recipient: &mut LeafMut<'_, K, V>) {
        let size = self.size();
        let split_from = self.min_size();
        for i in split_from..size {
            let key = self.key_at(i);
            let value = self.value_at(i);
            recipient.write_pair(i - split_from, &key, &value);
        }
        node::set_size(recipient.page, size - split_from);
        node::set_size(self.page, split_from);
    }

    /// Merge support: append every pair to the recipient and hand over the
    /// sibling link.
    pub fn move_all_to(&mut self, recipient: &mut LeafMut<'_, K, V>) {
        let recipient_size = recipient.size();
        let size = self.size();
        for i in 0..size {
            let key = self.key_at(i);
            let value = self.value_at(i);
            recipient.write_pair(recipient_size + i, &key, &value);
        }
        node::set_size(recipient.page, recipient_size + size);
        recipient.set_next_page_id(self.next_page_id());
        node::set_size(self.page, 0);
        self.set_next_page_id(INVALID_PAGE_ID);
    }

    /// Redistribution from the right sibling: our first pair moves to the
    /// recipient's end.
    pub fn move_first_to_end_of(&mut self, recipient: &mut LeafMut<'_, K, V>) {
        let key = self.key_at(0);
        let value = self.value_at(0);
        self.remove_pair_at(0);
        let size = recipient.size();
        recipient.write_pair(size, &key, &value);
        node::set_size(recipient.page, size + 1);
    }

    /// Redistribution from the left sibling: our last pair moves to the
    /// recipient's front.
    pub fn move_last_to_front_of(&mut self, recipient: &mut LeafMut<'_, K, V>) {
        let last = self.size() - 1;
        let key = self.key_at(last);
        let value = self.value_at(last);
        self.remove_pair_at(last);
        recipient.insert_pair_at(0, &key, &value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Rid;
    use crate::index::btree::key::{GenericComparator, Key8};

    type TestLeaf<'a> = LeafMut<'a, Key8, Rid>;

    fn make_leaf<'a>(page: &'a mut Page, keys: &[i64]) -> TestLeaf<'a> {
        let cmp = GenericComparator::<8>;
        let mut leaf = TestLeaf::init(page, 1, INVALID_PAGE_ID, 16);
        for &k in keys {
            leaf.insert(&Key8::from_i64(k), &Rid::new(0, k as u32), &cmp);
        }
        leaf
    }

    #[test]
    fn test_sorted_insert_and_lookup() {
        let cmp = GenericComparator::<8>;
        let mut page = Page::new(1);
        let leaf = make_leaf(&mut page, &[5, 1, 3]);

        assert_eq!(leaf.size(), 3);
        assert_eq!(leaf.key_at(0).to_i64(), 1);
        assert_eq!(leaf.key_at(1).to_i64(), 3);
        assert_eq!(leaf.key_at(2).to_i64(), 5);

        assert_eq!(leaf.lookup(&Key8::from_i64(3), &cmp), Some(Rid::new(0, 3)));
        assert_eq!(leaf.lookup(&Key8::from_i64(4), &cmp), None);
    }

    #[test]
    fn test_key_index_first_geq() {
        let cmp = GenericComparator::<8>;
        let mut page = Page::new(1);
        let leaf = make_leaf(&mut page, &[10, 20, 30]);

        assert_eq!(leaf.key_index(&Key8::from_i64(5), &cmp), 0);
        assert_eq!(leaf.key_index(&Key8::from_i64(20), &cmp), 1);
        assert_eq!(leaf.key_index(&Key8::from_i64(25), &cmp), 2);
        assert_eq!(leaf.key_index(&Key8::from_i64(35), &cmp), 3);
    }

    #[test]
    fn test_remove_reports_index() {
        let cmp = GenericComparator::<8>;
        let mut page = Page::new(1);
        let mut leaf = make_leaf(&mut page, &[10, 20, 30]);

        assert_eq!(leaf.remove_and_delete_record(&Key8::from_i64(10), &cmp), Some(0));
        assert_eq!(leaf.remove_and_delete_record(&Key8::from_i64(10), &cmp), None);
        assert_eq!(leaf.size(), 2);
        assert_eq!(leaf.key_at(0).to_i64(), 20);
    }

    #[test]
    fn test_move_half_splits_at_min_size() {
        let mut left_page = Page::new(1);
        let mut right_page = Page::new(2);
        let cmp = GenericComparator::<8>;

        let mut left = TestLeaf::init(&mut left_page, 1, INVALID_PAGE_ID, 4);
        for k in [1i64, 2, 3, 4] {
            left.insert(&Key8::from_i64(k), &Rid::new(0, k as u32), &cmp);
        }
        let mut right = TestLeaf::init(&mut right_page, 2, INVALID_PAGE_ID, 4);

        left.move_half_to(&mut right);
        assert_eq!(left.size(), 2);
        assert_eq!(right.size(), 2);
        assert_eq!(right.key_at(0).to_i64(), 3);
    }

    #[test]
    fn test_move_all_to_splices_sibling_link() {
        let mut left_page = Page::new(1);
        let mut right_page = Page::new(2);
        let mut right = make_leaf(&mut right_page, &[4, 5]);
        right.set_next_page_id(9);
        let mut left = make_leaf(&mut left_page, &[1, 2]);
        left.set_next_page_id(2);

        right.move_all_to(&mut left);

        assert_eq!(left.size(), 4);
        assert_eq!(left.key_at(2).to_i64(), 4);
        assert_eq!(left.next_page_id(), 9);
        assert_eq!(right.size(), 0);
    }

    #[test]
    fn test_redistribution_moves() {
        let mut a_page = Page::new(1);
        let mut b_page = Page::new(2);
        let mut a = make_leaf(&mut a_page, &[1, 2]);
        let mut b = make_leaf(&mut b_page, &[5, 6, 7]);

        // Right sibling donates its first entry.
        b.move_first_to_end_of(&mut a);
        assert_eq!(a.size(), 3);
        assert_eq!(a.key_at(2).to_i64(), 5);
        assert_eq!(b.key_at(0).to_i64(), 6);

        // Left sibling donates its last entry.
        a.move_last_to_front_of(&mut b);
        assert_eq!(b.key_at(0).to_i64(), 5);
        assert_eq!(a.size(), 2);
    }
}
