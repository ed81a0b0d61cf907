use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, Rid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states. A transaction grows until its first unlock,
/// shrinks afterwards, and never acquires again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why the lock manager gave up on a transaction.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("lock requested while shrinking")]
    LockOnShrinking,
    #[error("shared lock requested under READ_UNCOMMITTED")]
    LockSharedOnReadUncommitted,
    #[error("concurrent upgrade on the same record")]
    UpgradeConflict,
    #[error("chosen as deadlock victim")]
    Deadlock,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbortError {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

impl TransactionAbortError {
    pub fn new(txn_id: TxnId, reason: AbortReason) -> Self {
        Self { txn_id, reason }
    }
}

/// An active transaction: 2PL state plus the record locks it holds. Shared
/// between the requesting thread and the deadlock detector, so state lives
/// behind a mutex.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
    prev_lsn: AtomicU64,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            prev_lsn: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn.load(Ordering::SeqCst)
    }

    pub fn set_prev_lsn(&self, lsn: Lsn) {
        self.prev_lsn.store(lsn, Ordering::SeqCst);
    }

    pub fn holds_shared(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn holds_exclusive(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub(crate) fn add_shared(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn add_exclusive(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_shared(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().remove(&rid)
    }

    pub(crate) fn remove_exclusive(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().remove(&rid)
    }

    /// Snapshot of every rid this transaction still holds, for release at
    /// commit/abort.
    pub(crate) fn held_lock_rids(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = Vec::new();
        rids.extend(self.shared_lock_set.lock().iter().copied());
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_is_growing() {
        let txn = Transaction::new(1, IsolationLevel::RepeatableRead);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation_level(), IsolationLevel::RepeatableRead);
    }

    #[test]
    fn test_lock_set_tracking() {
        let txn = Transaction::new(2, IsolationLevel::ReadCommitted);
        let rid = Rid::new(1, 4);

        txn.add_shared(rid);
        assert!(txn.holds_shared(rid));
        assert!(!txn.holds_exclusive(rid));

        assert!(txn.remove_shared(rid));
        assert!(!txn.remove_shared(rid));
    }
}
