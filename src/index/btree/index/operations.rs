use log::debug;

use crate::common::types::INVALID_PAGE_ID;
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::{KeyComparator, StorageCodec};
use crate::index::btree::node::internal::InternalMut;
use crate::index::btree::node::leaf::{LeafMut, LeafRef};
use crate::index::btree::node::{self, OpType};
use super::base::{BPlusTree, Context, RootIdChange, WriteLatch};

impl<K, V, C> BPlusTree<K, V, C>
where
    K: StorageCodec,
    V: StorageCodec,
    C: KeyComparator<K>,
{
    /// Point lookup for a unique key.
    pub fn get_value(&self, key: &K) -> Result<Option<V>, BTreeError> {
        let Some((page_id, guard)) = self.find_leaf_read(Some(key))? else {
            return Ok(None);
        };
        let result = LeafRef::<K, V>::new(&guard).lookup(key, &self.comparator);
        drop(guard);
        self.buffer_pool.unpin_page(page_id, false);
        Ok(result)
    }

    /// Insert a unique key. Returns false (leaving the tree untouched) when
    /// the key is already present.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, BTreeError> {
        loop {
            {
                let mut root = self.root_page_id.lock();
                if *root == INVALID_PAGE_ID {
                    // Empty tree: the root latch covers the whole creation.
                    let (page_ptr, page_id) = self.buffer_pool.new_page()?;
                    {
                        let mut page = page_ptr.write();
                        let mut leaf = LeafMut::<K, V>::init(
                            &mut page,
                            page_id,
                            INVALID_PAGE_ID,
                            self.leaf_max_size,
                        );
                        leaf.insert(key, value, &self.comparator);
                    }
                    *root = page_id;
                    drop(root);
                    self.buffer_pool.unpin_page(page_id, true);
                    self.update_root_page_id(RootIdChange::FirstInsert)?;
                    return Ok(true);
                }
            }

            let mut ctx = Context::new();
            let Some(leaf) = self.find_leaf_write(key, OpType::Insert, &mut ctx)? else {
                // The last key was removed between the check and the
                // descent; take the empty-tree path again.
                continue;
            };
            return self.insert_into_leaf(&mut ctx, leaf, key, value);
        }
    }

    fn insert_into_leaf(
        &self,
        ctx: &mut Context,
        leaf: WriteLatch,
        key: &K,
        value: &V,
    ) -> Result<bool, BTreeError> {
        let WriteLatch {
            page_id: leaf_id,
            mut guard,
        } = leaf;

        if LeafRef::<K, V>::new(&guard).lookup(key, &self.comparator).is_some() {
            drop(guard);
            self.buffer_pool.unpin_page(leaf_id, true);
            ctx.release_all(&self.buffer_pool);
            return Ok(false);
        }

        let size = {
            let mut leaf_mut = LeafMut::<K, V>::new(&mut guard);
            leaf_mut.insert(key, value, &self.comparator)
        };

        if size > self.leaf_max_size - 1 {
            // Overflow: carve off a sibling and push the split upward.
            let (new_ptr, new_page_id) = match self.buffer_pool.new_page() {
                Ok(created) => created,
                Err(e) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(leaf_id, true);
                    ctx.release_all(&self.buffer_pool);
                    return Err(e.into());
                }
            };
            let mut new_guard = new_ptr.write_arc();
            let up_key;
            {
                let mut new_leaf = LeafMut::<K, V>::init(
                    &mut new_guard,
                    new_page_id,
                    node::parent_page_id(&guard),
                    self.leaf_max_size,
                );
                let mut old_leaf = LeafMut::<K, V>::new(&mut guard);
                old_leaf.move_half_to(&mut new_leaf);
                new_leaf.set_next_page_id(old_leaf.next_page_id());
                old_leaf.set_next_page_id(new_page_id);
                up_key = new_leaf.key_at(0);
            }
            self.insert_into_parent(
                ctx,
                WriteLatch {
                    page_id: leaf_id,
                    guard,
                },
                up_key,
                WriteLatch {
                    page_id: new_page_id,
                    guard: new_guard,
                },
            )?;
        } else {
            drop(guard);
            self.buffer_pool.unpin_page(leaf_id, true);
        }

        ctx.release_all(&self.buffer_pool);
        Ok(true)
    }

    /// Hook `new` (the right half of a split) into the tree above `old`,
    /// splitting ancestors as overflow propagates. Guards for a level are
    /// dropped before the next level is touched, so child adoption during
    /// internal splits never meets a latch this thread still holds.
    pub(crate) fn insert_into_parent(
        &self,
        ctx: &mut Context,
        mut old: WriteLatch,
        mut up_key: K,
        mut new: WriteLatch,
    ) -> Result<(), BTreeError> {
        loop {
            if node::is_root(&old.guard) {
                let (root_ptr, root_id) = match self.buffer_pool.new_page() {
                    Ok(created) => created,
                    Err(e) => {
                        self.release_write(old);
                        self.release_write(new);
                        return Err(e.into());
                    }
                };
                {
                    let mut root_page = root_ptr.write();
                    let mut root = InternalMut::<K>::init(
                        &mut root_page,
                        root_id,
                        INVALID_PAGE_ID,
                        self.internal_max_size,
                    );
                    root.populate_new_root(old.page_id, &up_key, new.page_id);
                }
                node::set_parent_page_id(&mut old.guard, root_id);
                node::set_parent_page_id(&mut new.guard, root_id);
                {
                    *self.root_page_id.lock() = root_id;
                }
                debug!("index {}: promoted new root {}", self.index_name, root_id);
                self.release_write(old);
                self.release_write(new);
                self.buffer_pool.unpin_page(root_id, true);
                self.update_root_page_id(RootIdChange::NewRoot)?;
                return Ok(());
            }

            let mut parent = match ctx.pop() {
                Some(parent) => parent,
                None => {
                    self.release_write(old);
                    self.release_write(new);
                    return Err(BTreeError::LatchViolation);
                }
            };
            {
                let mut parent_view = InternalMut::<K>::new(&mut parent.guard);
                parent_view.insert_node_after(old.page_id, &up_key, new.page_id);
            }
            node::set_parent_page_id(&mut new.guard, parent.page_id);
            self.release_write(old);
            self.release_write(new);

            if node::size(&parent.guard) <= self.internal_max_size {
                self.release_write(parent);
                return Ok(());
            }

            // The parent overflowed in turn: split it and keep climbing.
            let (sibling_ptr, sibling_id) = match self.buffer_pool.new_page() {
                Ok(created) => created,
                Err(e) => {
                    self.release_write(parent);
                    return Err(e.into());
                }
            };
            let mut sibling_guard = sibling_ptr.write_arc();
            let next_up;
            {
                let mut sibling = InternalMut::<K>::init(
                    &mut sibling_guard,
                    sibling_id,
                    node::parent_page_id(&parent.guard),
                    self.internal_max_size,
                );
                let mut parent_view = InternalMut::<K>::new(&mut parent.guard);
                parent_view.move_half_to(&mut sibling, &self.buffer_pool)?;
                next_up = sibling.key_at(0);
            }
            old = parent;
            new = WriteLatch {
                page_id: sibling_id,
                guard: sibling_guard,
            };
            up_key = next_up;
        }
    }
}
