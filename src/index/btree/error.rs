use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Invalid tree order: {0}")]
    InvalidOrder(String),

    #[error("Tree structure corrupted: {0}")]
    Corrupted(String),

    #[error("Crabbing invariant violated: ancestor latch not held")]
    LatchViolation,

    #[error("Failed to persist root page id for index {0}")]
    RootNotPersisted(String),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}
