//! Executor-facing index surface: key tuples in, record ids out. The
//! catalog stores indexes behind the object-safe `Index` trait; the
//! concrete implementation wraps a `BPlusTree` at one of the fixed key
//! widths.

use std::sync::Arc;

use crate::catalog::schema::{Schema, Tuple};
use crate::common::types::Rid;
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::{GenericComparator, GenericKey};
use crate::index::btree::BPlusTree;
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::concurrency::Transaction;

#[derive(Debug, Clone)]
pub struct IndexMetadata {
    pub name: String,
    pub table_name: String,
    pub key_schema: Schema,
    pub key_attrs: Vec<usize>,
}

/// What the executors and the catalog backfill call. `key` is a tuple in
/// the index's key schema layout. The transaction is threaded through for
/// the surrounding 2PL protocol; the index itself synchronizes with page
/// latches.
pub trait Index: Send + Sync {
    fn name(&self) -> &str;
    fn table_name(&self) -> &str;
    fn key_attrs(&self) -> &[usize];

    fn insert_entry(
        &self,
        key: &Tuple,
        rid: Rid,
        txn: &Arc<Transaction>,
    ) -> Result<bool, BTreeError>;

    fn delete_entry(&self, key: &Tuple, rid: Rid, txn: &Arc<Transaction>)
        -> Result<(), BTreeError>;

    fn scan_key(&self, key: &Tuple, txn: &Arc<Transaction>) -> Result<Vec<Rid>, BTreeError>;
}

/// B+tree-backed index with an N-byte key (N in {4, 8, 16, 32, 64}).
pub struct BPlusTreeIndex<const N: usize> {
    metadata: IndexMetadata,
    tree: BPlusTree<GenericKey<N>, Rid, GenericComparator<N>>,
}

impl<const N: usize> BPlusTreeIndex<N> {
    pub fn new(
        metadata: IndexMetadata,
        buffer_pool: Arc<BufferPoolManager>,
    ) -> Result<Self, BTreeError> {
        let tree = BPlusTree::with_page_capacity(
            metadata.name.clone(),
            buffer_pool,
            GenericComparator::<N>,
        )?;
        Ok(Self { metadata, tree })
    }

    pub fn tree(&self) -> &BPlusTree<GenericKey<N>, Rid, GenericComparator<N>> {
        &self.tree
    }

    fn key_of(&self, key: &Tuple) -> GenericKey<N> {
        GenericKey::from_bytes(key.data())
    }
}

impl<const N: usize> Index for BPlusTreeIndex<N> {
    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn table_name(&self) -> &str {
        &self.metadata.table_name
    }

    fn key_attrs(&self) -> &[usize] {
        &self.metadata.key_attrs
    }

    fn insert_entry(
        &self,
        key: &Tuple,
        rid: Rid,
        _txn: &Arc<Transaction>,
    ) -> Result<bool, BTreeError> {
        self.tree.insert(&self.key_of(key), &rid)
    }

    fn delete_entry(
        &self,
        key: &Tuple,
        rid: Rid,
        _txn: &Arc<Transaction>,
    ) -> Result<(), BTreeError> {
        // Keys are unique; the rid is the caller's cross-check only.
        let _ = rid;
        self.tree.remove(&self.key_of(key))
    }

    fn scan_key(&self, key: &Tuple, _txn: &Arc<Transaction>) -> Result<Vec<Rid>, BTreeError> {
        Ok(self
            .tree
            .get_value(&self.key_of(key))?
            .into_iter()
            .collect())
    }
}

pub type BPlusTreeIndex4 = BPlusTreeIndex<4>;
pub type BPlusTreeIndex8 = BPlusTreeIndex<8>;
pub type BPlusTreeIndex16 = BPlusTreeIndex<16>;
pub type BPlusTreeIndex32 = BPlusTreeIndex<32>;
pub type BPlusTreeIndex64 = BPlusTreeIndex<64>;
