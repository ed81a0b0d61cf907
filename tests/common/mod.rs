use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use stratadb::common::types::Rid;
use stratadb::index::btree::{BPlusTree, GenericComparator, GenericKey};
use stratadb::storage::buffer::BufferPoolManager;
use stratadb::storage::disk::DiskManager;

#[allow(dead_code)]
pub type Key = GenericKey<8>;
#[allow(dead_code)]
pub type TestTree = BPlusTree<Key, Rid, GenericComparator<8>>;

// Create a buffer pool manager backed by a temporary database file
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let file = NamedTempFile::new()?;
    let disk_manager = Arc::new(DiskManager::new(file.path())?);
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, disk_manager, None));
    Ok((buffer_pool, file))
}

// Create a small-order tree for structural tests
#[allow(dead_code)]
pub fn create_test_tree(
    pool_size: usize,
    leaf_max: usize,
    internal_max: usize,
) -> Result<(TestTree, Arc<BufferPoolManager>, NamedTempFile)> {
    let (buffer_pool, file) = create_test_buffer_pool(pool_size)?;
    let tree = TestTree::new(
        "test_index",
        buffer_pool.clone(),
        GenericComparator::<8>,
        leaf_max,
        internal_max,
    )?;
    Ok((tree, buffer_pool, file))
}

#[allow(dead_code)]
pub fn key(value: i64) -> Key {
    Key::from_i64(value)
}

#[allow(dead_code)]
pub fn rid(value: i64) -> Rid {
    Rid::new(0, value as u32)
}
