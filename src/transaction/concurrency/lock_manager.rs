use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbortError, TransactionState,
};

/// Default cadence of the waits-for deadlock sweep.
pub const CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn: Arc<Transaction>,
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// Per-record request queue. FIFO order is preserved; granted state and the
/// two counters are the queue's compatibility summary.
struct LockRequestQueue {
    requests: Vec<LockRequest>,
    reading_count: u32,
    is_writing: bool,
    upgrading: bool,
    cv: Arc<Condvar>,
}

impl Default for LockRequestQueue {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            reading_count: 0,
            is_writing: false,
            upgrading: false,
            cv: Arc::new(Condvar::new()),
        }
    }
}

#[derive(Default)]
struct LockTable {
    queues: HashMap<Rid, LockRequestQueue>,
}

impl LockTable {
    fn queue_mut(&mut self, rid: Rid) -> &mut LockRequestQueue {
        self.queues.entry(rid).or_default()
    }
}

struct LockManagerInner {
    latch: Mutex<LockTable>,
    detection_interval: Duration,
    enabled: AtomicBool,
}

/// Two-phase lock manager over record ids, with waits-for deadlock
/// detection running on a dedicated thread.
///
/// One global latch guards the whole table; per-record condition variables
/// wake waiters. Waiters are interrupted only by the detector aborting
/// their transaction.
pub struct LockManager {
    inner: Arc<LockManagerInner>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new(detection_interval: Duration) -> Self {
        let inner = Arc::new(LockManagerInner {
            latch: Mutex::new(LockTable::default()),
            detection_interval,
            enabled: AtomicBool::new(true),
        });

        let worker = inner.clone();
        let handle = thread::spawn(move || {
            while worker.enabled.load(Ordering::SeqCst) {
                thread::sleep(worker.detection_interval);
                worker.run_detection_pass();
            }
        });

        Self {
            inner,
            detector: Mutex::new(Some(handle)),
        }
    }

    /// Take a shared lock on `rid`, blocking while a writer holds it.
    pub fn lock_shared(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<(), TransactionAbortError> {
        let mut table = self.inner.latch.lock();

        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(
                txn.id(),
                AbortReason::LockSharedOnReadUncommitted,
            ));
        }
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(
                txn.id(),
                AbortReason::LockOnShrinking,
            ));
        }

        let queue = table.queue_mut(rid);
        queue.requests.push(LockRequest {
            txn: txn.clone(),
            txn_id: txn.id(),
            mode: LockMode::Shared,
            granted: false,
        });
        let cv = queue.cv.clone();

        cv.wait_while(&mut table, |table| {
            txn.state() != TransactionState::Aborted
                && table.queues.get(&rid).is_some_and(|q| q.is_writing)
        });

        if txn.state() == TransactionState::Aborted {
            let queue = table.queue_mut(rid);
            queue.requests.retain(|r| r.txn_id != txn.id());
            return Err(TransactionAbortError::new(txn.id(), AbortReason::Deadlock));
        }

        let txn_id = txn.id();
        let queue = table.queue_mut(rid);
        queue.reading_count += 1;
        if let Some(request) = queue
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn_id && r.mode == LockMode::Shared)
        {
            request.granted = true;
        }
        txn.add_shared(rid);
        Ok(())
    }

    /// Take an exclusive lock on `rid`, blocking while any lock is held.
    pub fn lock_exclusive(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<(), TransactionAbortError> {
        let mut table = self.inner.latch.lock();

        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(
                txn.id(),
                AbortReason::LockOnShrinking,
            ));
        }

        let queue = table.queue_mut(rid);
        queue.requests.push(LockRequest {
            txn: txn.clone(),
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: false,
        });
        let cv = queue.cv.clone();

        cv.wait_while(&mut table, |table| {
            txn.state() != TransactionState::Aborted
                && table
                    .queues
                    .get(&rid)
                    .is_some_and(|q| q.is_writing || q.reading_count > 0)
        });

        if txn.state() == TransactionState::Aborted {
            let queue = table.queue_mut(rid);
            queue.requests.retain(|r| r.txn_id != txn.id());
            return Err(TransactionAbortError::new(txn.id(), AbortReason::Deadlock));
        }

        self.grant_exclusive(&mut table, txn, rid);
        Ok(())
    }

    /// Upgrade a held shared lock to exclusive. Only one upgrade may be in
    /// flight per record; a second one aborts with `UpgradeConflict`.
    pub fn lock_upgrade(
        &self,
        txn: &Arc<Transaction>,
        rid: Rid,
    ) -> Result<(), TransactionAbortError> {
        let mut table = self.inner.latch.lock();

        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(
                txn.id(),
                AbortReason::LockOnShrinking,
            ));
        }

        let txn_id = txn.id();
        let queue = table.queue_mut(rid);
        if queue.is_writing || queue.upgrading {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionAbortError::new(
                txn_id,
                AbortReason::UpgradeConflict,
            ));
        }

        // Swap the shared request for an exclusive one, in place.
        queue.upgrading = true;
        if txn.remove_shared(rid) {
            queue.reading_count = queue.reading_count.saturating_sub(1);
        }
        queue.requests.retain(|r| r.txn_id != txn_id);
        queue.requests.push(LockRequest {
            txn: txn.clone(),
            txn_id,
            mode: LockMode::Exclusive,
            granted: false,
        });
        let cv = queue.cv.clone();

        cv.wait_while(&mut table, |table| {
            txn.state() != TransactionState::Aborted
                && table
                    .queues
                    .get(&rid)
                    .is_some_and(|q| q.is_writing || q.reading_count > 0)
        });

        if txn.state() == TransactionState::Aborted {
            let queue = table.queue_mut(rid);
            queue.upgrading = false;
            queue.requests.retain(|r| r.txn_id != txn_id);
            return Err(TransactionAbortError::new(txn_id, AbortReason::Deadlock));
        }

        self.grant_exclusive(&mut table, txn, rid);
        table.queue_mut(rid).upgrading = false;
        Ok(())
    }

    fn grant_exclusive(&self, table: &mut LockTable, txn: &Arc<Transaction>, rid: Rid) {
        let txn_id = txn.id();
        let queue = table.queue_mut(rid);
        queue.is_writing = true;
        if let Some(request) = queue
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn_id && r.mode == LockMode::Exclusive)
        {
            request.granted = true;
        }
        txn.add_exclusive(rid);
    }

    /// Release whatever lock `txn` holds on `rid`. The first release moves
    /// the transaction from GROWING to SHRINKING.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        let mut table = self.inner.latch.lock();

        let queue = match table.queues.get_mut(&rid) {
            Some(queue) => queue,
            None => return false,
        };

        let mut held = false;
        if txn.remove_shared(rid) {
            queue.reading_count = queue.reading_count.saturating_sub(1);
            held = true;
        }
        if txn.remove_exclusive(rid) {
            queue.is_writing = false;
            held = true;
        }
        queue.requests.retain(|r| r.txn_id != txn.id());
        queue.cv.notify_all();

        if txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }
        held
    }

    /// Current waits-for edges, rebuilt from the lock table.
    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let table = self.inner.latch.lock();
        let graph = build_waits_for(&table);
        graph
            .iter()
            .flat_map(|(&from, targets)| targets.iter().map(move |&to| (from, to)))
            .collect()
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
    }
}

impl LockManagerInner {
    /// One detection tick: rebuild the graph from scratch and abort the
    /// youngest transaction of every cycle found.
    fn run_detection_pass(&self) {
        let table = self.latch.lock();
        let mut waits_for = build_waits_for(&table);

        while let Some(victim) = find_cycle_victim(&waits_for) {
            debug!("deadlock detected, aborting youngest transaction {}", victim);

            let mut wake = Vec::new();
            for queue in table.queues.values() {
                let mut involved = false;
                for request in &queue.requests {
                    if request.txn_id == victim {
                        request.txn.set_state(TransactionState::Aborted);
                        involved = true;
                    }
                }
                if involved {
                    wake.push(queue.cv.clone());
                }
            }
            for cv in wake {
                cv.notify_all();
            }

            waits_for.remove(&victim);
            for targets in waits_for.values_mut() {
                targets.remove(&victim);
            }
        }
    }
}

/// Waits-for edges: every ungranted request waits on every granted holder
/// it conflicts with (S on X; X on S and X).
fn build_waits_for(table: &LockTable) -> BTreeMap<TxnId, BTreeSet<TxnId>> {
    let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();

    for queue in table.queues.values() {
        if !queue.is_writing && queue.reading_count == 0 {
            continue;
        }

        let mut granted_shared = Vec::new();
        let mut granted_exclusive = Vec::new();
        let mut ungranted_shared = Vec::new();
        let mut ungranted_exclusive = Vec::new();
        for request in &queue.requests {
            match (request.granted, request.mode) {
                (true, LockMode::Shared) => granted_shared.push(request.txn_id),
                (true, LockMode::Exclusive) => granted_exclusive.push(request.txn_id),
                (false, LockMode::Shared) => ungranted_shared.push(request.txn_id),
                (false, LockMode::Exclusive) => ungranted_exclusive.push(request.txn_id),
            }
        }

        for &waiter in &ungranted_shared {
            for &holder in &granted_exclusive {
                graph.entry(waiter).or_default().insert(holder);
            }
        }
        for &waiter in &ungranted_exclusive {
            for &holder in granted_shared.iter().chain(&granted_exclusive) {
                graph.entry(waiter).or_default().insert(holder);
            }
        }
    }
    graph
}

/// Deterministic DFS over txn-id order. On a back edge the victim is the
/// largest transaction id on the cycle (the youngest transaction).
fn find_cycle_victim(graph: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<TxnId> {
    let mut visited = BTreeSet::new();
    for &start in graph.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut stack = Vec::new();
        if let Some(victim) = dfs(graph, start, &mut stack, &mut visited) {
            return Some(victim);
        }
    }
    None
}

fn dfs(
    graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
    current: TxnId,
    stack: &mut Vec<TxnId>,
    visited: &mut BTreeSet<TxnId>,
) -> Option<TxnId> {
    stack.push(current);
    visited.insert(current);

    if let Some(children) = graph.get(&current) {
        for &child in children {
            if let Some(position) = stack.iter().position(|&t| t == child) {
                return stack[position..].iter().copied().max();
            }
            if !visited.contains(&child) {
                if let Some(victim) = dfs(graph, child, stack, visited) {
                    return Some(victim);
                }
            }
        }
    }

    stack.pop();
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_of(edges: &[(TxnId, TxnId)]) -> BTreeMap<TxnId, BTreeSet<TxnId>> {
        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        for &(from, to) in edges {
            graph.entry(from).or_default().insert(to);
        }
        graph
    }

    #[test]
    fn test_no_cycle() {
        let graph = graph_of(&[(1, 2), (2, 3), (1, 3)]);
        assert_eq!(find_cycle_victim(&graph), None);
    }

    #[test]
    fn test_two_cycle_picks_youngest() {
        let graph = graph_of(&[(1, 2), (2, 1)]);
        assert_eq!(find_cycle_victim(&graph), Some(2));
    }

    #[test]
    fn test_long_cycle_picks_youngest_on_cycle() {
        // 5 points into the cycle {1, 2, 3} but is not on it.
        let graph = graph_of(&[(5, 1), (1, 2), (2, 3), (3, 1)]);
        assert_eq!(find_cycle_victim(&graph), Some(3));
    }

    #[test]
    fn test_detection_loop_terminates_after_purge() {
        let mut graph = graph_of(&[(1, 2), (2, 1), (3, 4), (4, 3)]);
        let mut victims = Vec::new();
        while let Some(victim) = find_cycle_victim(&graph) {
            victims.push(victim);
            graph.remove(&victim);
            for targets in graph.values_mut() {
                targets.remove(&victim);
            }
        }
        victims.sort_unstable();
        assert_eq!(victims, vec![2, 4]);
    }
}
