use log::debug;

use crate::common::types::{INVALID_PAGE_ID, PageId};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::{KeyComparator, StorageCodec};
use crate::index::btree::node::internal::{InternalMut, InternalRef};
use crate::index::btree::node::leaf::{LeafMut, LeafRef};
use crate::index::btree::node::{self, NodeType, OpType};
use super::base::{BPlusTree, Context, RootIdChange, WriteLatch};

impl<K, V, C> BPlusTree<K, V, C>
where
    K: StorageCodec,
    V: StorageCodec,
    C: KeyComparator<K>,
{
    /// Remove a key; absent keys are a no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let mut ctx = Context::new();
        let Some(leaf) = self.find_leaf_write(key, OpType::Delete, &mut ctx)? else {
            return Ok(());
        };
        let WriteLatch {
            page_id: leaf_id,
            mut guard,
        } = leaf;

        let removed_index = {
            let mut leaf_mut = LeafMut::<K, V>::new(&mut guard);
            leaf_mut.remove_and_delete_record(key, &self.comparator)
        };
        let Some(removed_index) = removed_index else {
            drop(guard);
            self.buffer_pool.unpin_page(leaf_id, true);
            ctx.release_all(&self.buffer_pool);
            return Ok(());
        };

        let size = node::size(&guard);
        let min_size = node::min_size(&guard);
        let parent_id = node::parent_page_id(&guard);

        // The head key doubles as the parent separator; removing it leaves
        // the separator pointing at the old key. Fix it through the latched
        // parent when we still hold it, otherwise after all latches drop.
        let mut deferred_separator_fix: Option<(PageId, K)> = None;
        if removed_index == 0 && parent_id != INVALID_PAGE_ID && size > 0 {
            let new_first = LeafRef::<K, V>::new(&guard).key_at(0);
            match ctx.last_mut() {
                Some(parent_latch) => {
                    let mut parent = InternalMut::<K>::new(&mut parent_latch.guard);
                    if let Some(i) = parent.key_index(key, &self.comparator) {
                        parent.set_key_at(i, &new_first);
                    }
                }
                None => deferred_separator_fix = Some((parent_id, new_first)),
            }
        }

        if size < min_size {
            self.coalesce_or_redistribute(
                &mut ctx,
                WriteLatch {
                    page_id: leaf_id,
                    guard,
                },
            )?;
        } else {
            drop(guard);
            self.buffer_pool.unpin_page(leaf_id, true);
        }
        ctx.release_all(&self.buffer_pool);

        if let Some((parent_id, new_first)) = deferred_separator_fix {
            let parent_ptr = self.buffer_pool.fetch_page(parent_id)?;
            {
                let mut parent_page = parent_ptr.write();
                if node::node_type(&parent_page) == NodeType::Internal {
                    let mut parent = InternalMut::<K>::new(&mut parent_page);
                    if let Some(i) = parent.key_index(key, &self.comparator) {
                        parent.set_key_at(i, &new_first);
                    }
                }
            }
            self.buffer_pool.unpin_page(parent_id, true);
        }
        Ok(())
    }

    /// Restore the minimum-occupancy invariant for an underfull node:
    /// redistribute from a sibling that can spare an entry (right first),
    /// otherwise merge and climb. Guards below the current level have all
    /// been released by the time a level is reworked.
    fn coalesce_or_redistribute(
        &self,
        ctx: &mut Context,
        node_latch: WriteLatch,
    ) -> Result<(), BTreeError> {
        let mut current = node_latch;
        loop {
            if node::is_root(&current.guard) {
                return self.adjust_root(current);
            }

            let mut parent = match ctx.pop() {
                Some(parent) => parent,
                None => {
                    self.release_write(current);
                    return Err(BTreeError::LatchViolation);
                }
            };

            let is_leaf = node::node_type(&current.guard) == NodeType::Leaf;
            let index = match InternalRef::<K>::new(&parent.guard).value_index(current.page_id) {
                Some(index) => index,
                None => {
                    let current_page_id = current.page_id;
                    let parent_page_id = parent.page_id;
                    self.release_write(current);
                    self.release_write(parent);
                    return Err(BTreeError::Corrupted(format!(
                        "page {} missing from parent {}",
                        current_page_id, parent_page_id
                    )));
                }
            };
            let parent_size = node::size(&parent.guard);

            // Right sibling with an entry to spare?
            if index + 1 < parent_size {
                let right_id = InternalRef::<K>::new(&parent.guard).value_at(index + 1);
                let right_ptr = self.buffer_pool.fetch_page(right_id)?;
                let mut right_guard = right_ptr.write_arc();
                let spare = if is_leaf {
                    node::size(&right_guard) > node::min_size(&right_guard)
                } else {
                    node::size(&right_guard) > node::min_size(&right_guard) + 1
                };
                if spare {
                    if is_leaf {
                        let mut right = LeafMut::<K, V>::new(&mut right_guard);
                        let mut node_view = LeafMut::<K, V>::new(&mut current.guard);
                        right.move_first_to_end_of(&mut node_view);
                        let new_separator = right.key_at(0);
                        let mut parent_view = InternalMut::<K>::new(&mut parent.guard);
                        parent_view.set_key_at(index + 1, &new_separator);
                    } else {
                        let middle_key = InternalRef::<K>::new(&parent.guard).key_at(index + 1);
                        let new_separator;
                        {
                            let mut right = InternalMut::<K>::new(&mut right_guard);
                            let mut node_view = InternalMut::<K>::new(&mut current.guard);
                            right.move_first_to_end_of(
                                &mut node_view,
                                &middle_key,
                                &self.buffer_pool,
                            )?;
                            new_separator = right.key_at(0);
                        }
                        let mut parent_view = InternalMut::<K>::new(&mut parent.guard);
                        parent_view.set_key_at(index + 1, &new_separator);
                    }
                    drop(right_guard);
                    self.buffer_pool.unpin_page(right_id, true);
                    self.release_write(current);
                    self.release_write(parent);
                    return Ok(());
                }
                drop(right_guard);
                self.buffer_pool.unpin_page(right_id, false);
            }

            // Left sibling with an entry to spare?
            if index >= 1 {
                let left_id = InternalRef::<K>::new(&parent.guard).value_at(index - 1);
                let left_ptr = self.buffer_pool.fetch_page(left_id)?;
                let mut left_guard = left_ptr.write_arc();
                let spare = if is_leaf {
                    node::size(&left_guard) > node::min_size(&left_guard)
                } else {
                    node::size(&left_guard) > node::min_size(&left_guard) + 1
                };
                if spare {
                    if is_leaf {
                        let mut left = LeafMut::<K, V>::new(&mut left_guard);
                        let mut node_view = LeafMut::<K, V>::new(&mut current.guard);
                        left.move_last_to_front_of(&mut node_view);
                        let new_separator = node_view.key_at(0);
                        let mut parent_view = InternalMut::<K>::new(&mut parent.guard);
                        parent_view.set_key_at(index, &new_separator);
                    } else {
                        let middle_key = InternalRef::<K>::new(&parent.guard).key_at(index);
                        let new_separator;
                        {
                            let mut left = InternalMut::<K>::new(&mut left_guard);
                            let mut node_view = InternalMut::<K>::new(&mut current.guard);
                            left.move_last_to_front_of(
                                &mut node_view,
                                &middle_key,
                                &self.buffer_pool,
                            )?;
                            new_separator = node_view.key_at(0);
                        }
                        let mut parent_view = InternalMut::<K>::new(&mut parent.guard);
                        parent_view.set_key_at(index, &new_separator);
                    }
                    drop(left_guard);
                    self.buffer_pool.unpin_page(left_id, true);
                    self.release_write(current);
                    self.release_write(parent);
                    return Ok(());
                }
                drop(left_guard);
                self.buffer_pool.unpin_page(left_id, false);
            }

            // No sibling can spare: merge. Into the left sibling when one
            // exists, otherwise pull the right sibling into this node.
            if index >= 1 {
                let left_id = InternalRef::<K>::new(&parent.guard).value_at(index - 1);
                let left_ptr = self.buffer_pool.fetch_page(left_id)?;
                let mut left_guard = left_ptr.write_arc();
                if is_leaf {
                    let mut left = LeafMut::<K, V>::new(&mut left_guard);
                    let mut node_view = LeafMut::<K, V>::new(&mut current.guard);
                    node_view.move_all_to(&mut left);
                } else {
                    let middle_key = InternalRef::<K>::new(&parent.guard).key_at(index);
                    let mut left = InternalMut::<K>::new(&mut left_guard);
                    let mut node_view = InternalMut::<K>::new(&mut current.guard);
                    node_view.move_all_to(&mut left, &middle_key, &self.buffer_pool)?;
                }
                drop(left_guard);
                self.buffer_pool.unpin_page(left_id, true);

                let merged_id = current.page_id;
                drop(current.guard);
                self.buffer_pool.unpin_page(merged_id, true);
                self.buffer_pool.delete_page(merged_id)?;
                debug!("index {}: merged page {} into {}", self.index_name, merged_id, left_id);

                let mut parent_view = InternalMut::<K>::new(&mut parent.guard);
                parent_view.remove(index);
            } else {
                let right_id = InternalRef::<K>::new(&parent.guard).value_at(index + 1);
                let right_ptr = self.buffer_pool.fetch_page(right_id)?;
                let mut right_guard = right_ptr.write_arc();
                if is_leaf {
                    let mut right = LeafMut::<K, V>::new(&mut right_guard);
                    let mut node_view = LeafMut::<K, V>::new(&mut current.guard);
                    right.move_all_to(&mut node_view);
                } else {
                    let middle_key = InternalRef::<K>::new(&parent.guard).key_at(index + 1);
                    let mut right = InternalMut::<K>::new(&mut right_guard);
                    let mut node_view = InternalMut::<K>::new(&mut current.guard);
                    right.move_all_to(&mut node_view, &middle_key, &self.buffer_pool)?;
                }
                drop(right_guard);
                self.buffer_pool.unpin_page(right_id, true);
                self.buffer_pool.delete_page(right_id)?;
                debug!("index {}: merged page {} into {}", self.index_name, right_id, current.page_id);

                let node_id = current.page_id;
                drop(current.guard);
                self.buffer_pool.unpin_page(node_id, true);

                let mut parent_view = InternalMut::<K>::new(&mut parent.guard);
                parent_view.remove(index + 1);
            }

            let parent_size = node::size(&parent.guard);
            if parent_size - 1 < node::min_size(&parent.guard) {
                current = parent;
                continue;
            }
            self.release_write(parent);
            return Ok(());
        }
    }

    /// The root escaped the occupancy rules; shrink the tree when it became
    /// empty (leaf) or degenerate (internal with a single child).
    fn adjust_root(&self, root_latch: WriteLatch) -> Result<(), BTreeError> {
        let WriteLatch { page_id, guard } = root_latch;

        match node::node_type(&guard) {
            NodeType::Leaf if node::size(&guard) == 0 => {
                // Publish the root change before the latch drops, so a
                // descent blocked on this page fails its root recheck.
                {
                    *self.root_page_id.lock() = INVALID_PAGE_ID;
                }
                drop(guard);
                self.buffer_pool.unpin_page(page_id, true);
                self.buffer_pool.delete_page(page_id)?;
                debug!("index {}: tree is empty again", self.index_name);
                self.update_root_page_id(RootIdChange::Update)
            }
            NodeType::Internal if node::size(&guard) == 1 => {
                let new_root_id = InternalRef::<K>::new(&guard).value_at(0);
                {
                    *self.root_page_id.lock() = new_root_id;
                }
                drop(guard);
                self.buffer_pool.unpin_page(page_id, true);
                self.buffer_pool.delete_page(page_id)?;
                self.update_root_page_id(RootIdChange::Update)?;

                let child_ptr = self.buffer_pool.fetch_page(new_root_id)?;
                {
                    let mut child = child_ptr.write();
                    node::set_parent_page_id(&mut child, INVALID_PAGE_ID);
                }
                self.buffer_pool.unpin_page(new_root_id, true);
                debug!("index {}: promoted page {} to root", self.index_name, new_root_id);
                Ok(())
            }
            _ => {
                drop(guard);
                self.buffer_pool.unpin_page(page_id, true);
                Ok(())
            }
        }
    }
}
