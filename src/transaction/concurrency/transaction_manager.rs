use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};
use crate::transaction::wal::{LogManager, LogRecordType};

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} is already committed or aborted")]
    InvalidState(TxnId),

    #[error("Transaction {0} not found")]
    NotFound(TxnId),
}

/// Creates and tracks transactions, and enforces strict two-phase locking:
/// every lock a transaction still holds is released here, at commit or
/// abort, never earlier.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<LogManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, log_manager: Arc<LogManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            log_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Begin a new transaction.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));

        let lsn = self.log_manager.append_record(txn_id, 0, LogRecordType::Begin);
        txn.set_prev_lsn(lsn);

        self.active_transactions.lock().insert(txn_id, txn.clone());
        debug!("begin transaction {}", txn_id);
        txn
    }

    /// Commit: release every held lock, then retire the transaction.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        match txn.state() {
            TransactionState::Growing | TransactionState::Shrinking => {}
            _ => return Err(TransactionError::InvalidState(txn.id())),
        }
        txn.set_state(TransactionState::Committed);

        let lsn = self
            .log_manager
            .append_record(txn.id(), txn.prev_lsn(), LogRecordType::Commit);
        txn.set_prev_lsn(lsn);

        self.release_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        debug!("commit transaction {}", txn.id());
        Ok(())
    }

    /// Abort: used both for voluntary rollback and after a
    /// `TransactionAbortError` (deadlock victims arrive already ABORTED).
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::InvalidState(txn.id()));
        }
        txn.set_state(TransactionState::Aborted);

        let lsn = self
            .log_manager
            .append_record(txn.id(), txn.prev_lsn(), LogRecordType::Abort);
        txn.set_prev_lsn(lsn);

        self.release_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        debug!("abort transaction {}", txn.id());
        Ok(())
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }

    fn release_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.held_lock_rids() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
