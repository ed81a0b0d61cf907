use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;

use crate::common::types::{Lsn, TxnId};

/// Kinds of records the storage core emits. Data records belong to the
/// recovery subsystem, which this crate treats as an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    Begin,
    Commit,
    Abort,
}

#[derive(Debug, Clone, Copy)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub prev_lsn: Lsn,
    pub txn_id: TxnId,
    pub record_type: LogRecordType,
}

/// Slim log manager: allocates LSNs and keeps the transaction lifecycle
/// hooks alive. It is carried through constructors as an opaque
/// collaborator; durable logging and recovery live outside this crate.
pub struct LogManager {
    next_lsn: AtomicU64,
    records: Mutex<Vec<LogRecord>>,
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LogManager {
    pub fn new() -> Self {
        Self {
            next_lsn: AtomicU64::new(1),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn append_record(&self, txn_id: TxnId, prev_lsn: Lsn, record_type: LogRecordType) -> Lsn {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        self.records.lock().push(LogRecord {
            lsn,
            prev_lsn,
            txn_id,
            record_type,
        });
        lsn
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn records_for(&self, txn_id: TxnId) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.txn_id == txn_id)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsns_are_monotonic() {
        let log_manager = LogManager::new();
        let a = log_manager.append_record(1, 0, LogRecordType::Begin);
        let b = log_manager.append_record(1, a, LogRecordType::Commit);
        assert!(b > a);
        assert_eq!(log_manager.record_count(), 2);
    }

    #[test]
    fn test_records_for_filters_by_txn() {
        let log_manager = LogManager::new();
        log_manager.append_record(1, 0, LogRecordType::Begin);
        log_manager.append_record(2, 0, LogRecordType::Begin);
        log_manager.append_record(1, 1, LogRecordType::Abort);

        let records = log_manager.records_for(1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].record_type, LogRecordType::Abort);
    }
}
