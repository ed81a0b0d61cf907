// Transaction management: two-phase locking and the write-ahead-log hooks.

pub mod concurrency;
pub mod wal;

// Public exports
pub use concurrency::{
    AbortReason, IsolationLevel, LockManager, Transaction, TransactionAbortError,
    TransactionManager, TransactionState,
};
pub use wal::LogManager;
