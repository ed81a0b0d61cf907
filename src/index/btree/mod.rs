pub mod error;
pub mod key;
pub mod node;
pub mod index;

pub use error::BTreeError;
pub use index::{BPlusTree, TreeIterator};
pub use key::{GenericComparator, GenericKey, KeyComparator, StorageCodec};
