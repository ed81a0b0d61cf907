use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use anyhow::Result;

use stratadb::common::types::Rid;
use stratadb::transaction::concurrency::{
    AbortReason, IsolationLevel, LockManager, TransactionManager, TransactionState,
};
use stratadb::transaction::wal::LogManager;

fn test_managers() -> (Arc<LockManager>, TransactionManager) {
    let lock_manager = Arc::new(LockManager::new(Duration::from_millis(10)));
    let txn_manager = TransactionManager::new(lock_manager.clone(), Arc::new(LogManager::new()));
    (lock_manager, txn_manager)
}

#[test]
fn test_shared_locks_coexist() -> Result<()> {
    let (lock_manager, txn_manager) = test_managers();
    let rid = Rid::new(1, 1);

    let txns: Vec<_> = (0..4)
        .map(|_| txn_manager.begin(IsolationLevel::RepeatableRead))
        .collect();
    for txn in &txns {
        lock_manager.lock_shared(txn, rid)?;
        assert!(txn.holds_shared(rid));
    }
    for txn in &txns {
        txn_manager.commit(txn)?;
    }
    Ok(())
}

#[test]
fn test_exclusive_waits_for_readers() -> Result<()> {
    let (lock_manager, txn_manager) = test_managers();
    let rid = Rid::new(1, 2);

    let reader = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_shared(&reader, rid)?;

    let writer = txn_manager.begin(IsolationLevel::RepeatableRead);
    let acquired = Arc::new(AtomicBool::new(false));

    let handle = {
        let lock_manager = lock_manager.clone();
        let writer = writer.clone();
        let acquired = acquired.clone();
        thread::spawn(move || {
            let result = lock_manager.lock_exclusive(&writer, rid);
            acquired.store(true, Ordering::SeqCst);
            result
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!acquired.load(Ordering::SeqCst), "X lock granted alongside S");

    txn_manager.commit(&reader)?;
    handle.join().expect("writer thread panicked")?;
    assert!(writer.holds_exclusive(rid));
    txn_manager.commit(&writer)?;
    Ok(())
}

#[test]
fn test_lock_on_shrinking_aborts() -> Result<()> {
    let (lock_manager, txn_manager) = test_managers();
    let r1 = Rid::new(1, 3);
    let r2 = Rid::new(1, 4);

    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_shared(&txn, r1)?;

    // First release moves the transaction into its shrinking phase.
    assert!(lock_manager.unlock(&txn, r1));
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let err = lock_manager.lock_shared(&txn, r2).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);
    assert_eq!(txn.state(), TransactionState::Aborted);
    txn_manager.abort(&txn)?;
    Ok(())
}

#[test]
fn test_read_uncommitted_rejects_shared_lock() -> Result<()> {
    let (lock_manager, txn_manager) = test_managers();
    let rid = Rid::new(1, 5);

    let txn = txn_manager.begin(IsolationLevel::ReadUncommitted);
    let err = lock_manager.lock_shared(&txn, rid).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockSharedOnReadUncommitted);
    txn_manager.abort(&txn)?;

    // Exclusive locks are still available at that level.
    let writer = txn_manager.begin(IsolationLevel::ReadUncommitted);
    lock_manager.lock_exclusive(&writer, rid)?;
    txn_manager.commit(&writer)?;
    Ok(())
}

/// Classic cross lock: A holds R1 and wants R2, B holds R2 and wants R1.
/// The detector aborts exactly the younger transaction; the survivor
/// finishes.
#[test]
fn test_deadlock_aborts_youngest() -> Result<()> {
    let (lock_manager, txn_manager) = test_managers();
    let txn_manager = Arc::new(txn_manager);
    let r1 = Rid::new(2, 1);
    let r2 = Rid::new(2, 2);

    let txn_a = txn_manager.begin(IsolationLevel::RepeatableRead);
    let txn_b = txn_manager.begin(IsolationLevel::RepeatableRead);
    assert!(txn_b.id() > txn_a.id());

    lock_manager.lock_exclusive(&txn_a, r1)?;
    lock_manager.lock_exclusive(&txn_b, r2)?;

    let spawn_cross_lock = |txn: Arc<stratadb::Transaction>, rid: Rid| {
        let lock_manager = lock_manager.clone();
        let txn_manager = txn_manager.clone();
        thread::spawn(move || {
            let result = lock_manager.lock_exclusive(&txn, rid);
            if result.is_err() {
                txn_manager.abort(&txn).expect("abort failed");
            } else {
                txn_manager.commit(&txn).expect("commit failed");
            }
            result
        })
    };

    let handle_a = spawn_cross_lock(txn_a.clone(), r2);
    let handle_b = spawn_cross_lock(txn_b.clone(), r1);

    let result_a = handle_a.join().expect("thread A panicked");
    let result_b = handle_b.join().expect("thread B panicked");

    // The youngest of the cycle (B) is the victim; A survives.
    let err = result_b.unwrap_err();
    assert_eq!(err.reason, AbortReason::Deadlock);
    assert_eq!(err.txn_id, txn_b.id());
    assert!(result_a.is_ok());
    assert_eq!(txn_a.state(), TransactionState::Committed);
    assert_eq!(txn_b.state(), TransactionState::Aborted);
    Ok(())
}

/// Two holders of a shared lock both try to upgrade: one is rejected with
/// an upgrade conflict, and the other completes once the loser's lock is
/// gone.
#[test]
fn test_upgrade_conflict() -> Result<()> {
    let (lock_manager, txn_manager) = test_managers();
    let rid = Rid::new(3, 1);

    let txn_first = txn_manager.begin(IsolationLevel::RepeatableRead);
    let txn_second = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_shared(&txn_first, rid)?;
    lock_manager.lock_shared(&txn_second, rid)?;

    // The first upgrade parks, waiting out the other reader.
    let handle = {
        let lock_manager = lock_manager.clone();
        let txn_first = txn_first.clone();
        thread::spawn(move || lock_manager.lock_upgrade(&txn_first, rid))
    };
    thread::sleep(Duration::from_millis(50));

    let err = lock_manager.lock_upgrade(&txn_second, rid).unwrap_err();
    assert_eq!(err.reason, AbortReason::UpgradeConflict);
    txn_manager.abort(&txn_second)?;

    handle.join().expect("upgrade thread panicked")?;
    assert!(txn_first.holds_exclusive(rid));
    assert!(!txn_first.holds_shared(rid));
    txn_manager.commit(&txn_first)?;
    Ok(())
}

#[test]
fn test_unlock_wakes_waiting_writer() -> Result<()> {
    let (lock_manager, txn_manager) = test_managers();
    let rid = Rid::new(3, 2);

    let holder = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_exclusive(&holder, rid)?;

    let waiter = txn_manager.begin(IsolationLevel::RepeatableRead);
    let handle = {
        let lock_manager = lock_manager.clone();
        let waiter = waiter.clone();
        thread::spawn(move || lock_manager.lock_exclusive(&waiter, rid))
    };

    thread::sleep(Duration::from_millis(20));
    txn_manager.commit(&holder)?;

    handle.join().expect("waiter thread panicked")?;
    assert!(waiter.holds_exclusive(rid));
    txn_manager.commit(&waiter)?;
    Ok(())
}

#[test]
fn test_waits_for_edges_reflect_conflicts() -> Result<()> {
    let (lock_manager, txn_manager) = test_managers();
    let rid = Rid::new(4, 1);

    let holder = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_exclusive(&holder, rid)?;

    let waiter = txn_manager.begin(IsolationLevel::RepeatableRead);
    let handle = {
        let lock_manager = lock_manager.clone();
        let waiter = waiter.clone();
        thread::spawn(move || lock_manager.lock_shared(&waiter, rid))
    };
    thread::sleep(Duration::from_millis(20));

    let edges = lock_manager.edge_list();
    assert!(edges.contains(&(waiter.id(), holder.id())));

    txn_manager.commit(&holder)?;
    handle.join().expect("waiter thread panicked")?;
    txn_manager.commit(&waiter)?;
    Ok(())
}
