pub mod btree;
pub mod btree_index;

pub use btree::{BPlusTree, BTreeError};
pub use btree_index::{BPlusTreeIndex, Index, IndexMetadata};
