// Export public modules
pub mod common;
pub mod storage;
pub mod index;
pub mod transaction;
pub mod catalog;

// Re-export key items for convenient access
pub use storage::buffer::BufferPoolManager;
pub use storage::buffer::BufferPoolError;
pub use storage::disk::DiskManager;
pub use storage::page::PageManager;
pub use storage::page::PageError;
pub use index::btree::BPlusTree;
pub use transaction::concurrency::{LockManager, Transaction, TransactionManager};
pub use catalog::Catalog;
