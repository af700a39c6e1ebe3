//! FIFO exclusive lock state for resources owned by this node.
//!
//! Grounded on the teacher's `LockManager`/`WaiterManager` split
//! (`mod.rs`): this module owns the per-resource owner/queue state and
//! derives wait-for edges from it, exactly the role the teacher's
//! `waiter_manager.rs` plays for transaction waiters. Exact semantics
//! (re-entrant acquire, FIFO transfer on release, total abort) are
//! taken from `examples/original_source/service/lock_mgr.py`.

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as u64
}

/// Per-node FIFO exclusive lock table.
///
/// Invariants (spec.md §3):
/// 1. each `res` has at most one owner at any instant;
/// 2. a tx appears at most once in any single resource's queue;
/// 3. `waiting_on[tx] = res` implies `tx` is queued on `res` and is not
///    its owner;
/// 4. the owner of `res` is never also queued on `res`;
/// 5. `start_ts[tx]` is set once, on first contact, and never changes.
#[derive(Default)]
pub struct WaiterManager {
    owners: HashMap<String, String>,
    queues: HashMap<String, VecDeque<String>>,
    start_ts: HashMap<String, u64>,
    waiting_on: HashMap<String, Option<String>>,
}

impl WaiterManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// `acquire(tx, res) -> (granted, holder)` per spec.md §4.1.
    pub fn acquire(&mut self, tx: &str, res: &str) -> (bool, Option<String>) {
        self.start_ts.entry(tx.to_string()).or_insert_with(now_ms);

        match self.owners.get(res).cloned() {
            None => {
                self.owners.insert(res.to_string(), tx.to_string());
                self.waiting_on.insert(tx.to_string(), None);
                (true, None)
            }
            Some(holder) if holder == tx => {
                // Re-entrant acquire: does not nest (spec.md §9.3). A
                // single subsequent release frees the resource.
                self.waiting_on.insert(tx.to_string(), None);
                (true, None)
            }
            Some(holder) => {
                let queue = self.queues.entry(res.to_string()).or_default();
                if !queue.contains(&tx.to_string()) {
                    queue.push_back(tx.to_string());
                }
                self.waiting_on.insert(tx.to_string(), Some(res.to_string()));
                (false, Some(holder))
            }
        }
    }

    /// `release(tx, res) -> bool` per spec.md §4.1. Returns `false` if
    /// `tx` does not currently own `res` (the only core-level error,
    /// surfaced by the facade as a 409).
    pub fn release(&mut self, tx: &str, res: &str) -> bool {
        if self.owners.get(res).map(String::as_str) != Some(tx) {
            return false;
        }
        match self.queues.get_mut(res).and_then(VecDeque::pop_front) {
            Some(next) => {
                self.owners.insert(res.to_string(), next.clone());
                self.waiting_on.insert(next, None);
            }
            None => {
                self.owners.remove(res);
            }
        }
        true
    }

    /// `abort(tx) -> affected_count` per spec.md §4.1. A no-op (returns
    /// 0) for a tx this node has never seen.
    pub fn abort(&mut self, tx: &str) -> u32 {
        let mut affected = 0u32;

        for queue in self.queues.values_mut() {
            let before = queue.len();
            queue.retain(|w| w != tx);
            affected += (before - queue.len()) as u32;
        }

        let owned: Vec<String> = self
            .owners
            .iter()
            .filter(|(_, owner)| owner.as_str() == tx)
            .map(|(res, _)| res.clone())
            .collect();
        for res in owned {
            self.release(tx, &res);
            affected += 1;
        }

        self.waiting_on.remove(tx);
        self.start_ts.remove(tx);
        affected
    }

    pub fn holder_for(&self, res: &str) -> Option<String> {
        self.owners.get(res).cloned()
    }

    /// Age of `tx` in milliseconds since its first observation on this
    /// node. An unknown tx has age 0 (spec.md §4.1).
    pub fn tx_age_ms(&self, tx: &str) -> u64 {
        match self.start_ts.get(tx) {
            Some(ts) => now_ms().saturating_sub(*ts),
            None => 0,
        }
    }

    /// One `(waiter, holder)` edge per (waiter, resource) pair, for
    /// every resource with both an owner and a non-empty queue.
    /// Iteration order is unspecified (spec.md §4.1).
    pub fn blocked_edges(&self) -> Vec<(String, String)> {
        let mut edges = Vec::new();
        for (res, queue) in &self.queues {
            if queue.is_empty() {
                continue;
            }
            if let Some(holder) = self.owners.get(res) {
                for waiter in queue {
                    edges.push((waiter.clone(), holder.clone()));
                }
            }
        }
        edges
    }

    /// First holder that `tx` is blocked on, if any — i.e. the `h` such
    /// that `(tx, h)` is a blocked edge. Used by the detector for both
    /// the direct-cycle and classic-cycle checks and for forwarding.
    pub fn holder_blocking(&self, tx: &str) -> Option<String> {
        self.blocked_edges()
            .into_iter()
            .find(|(w, _)| w == tx)
            .map(|(_, h)| h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_single_node_direct_conflict_no_deadlock() {
        let mut lm = WaiterManager::new();
        assert_eq!(lm.acquire("t1", "R"), (true, None));
        assert_eq!(lm.acquire("t2", "R"), (false, Some("t1".to_string())));
        assert_eq!(
            lm.blocked_edges(),
            vec![("t2".to_string(), "t1".to_string())]
        );
        assert!(lm.release("t1", "R"));
        assert_eq!(lm.holder_for("R"), Some("t2".to_string()));
        assert!(lm.blocked_edges().is_empty());
    }

    #[test]
    fn s2_abort_transfers_ownership_fifo() {
        let mut lm = WaiterManager::new();
        lm.acquire("t1", "R");
        lm.acquire("t2", "R");
        lm.acquire("t3", "R");
        assert!(lm.abort("t1") >= 1);
        assert_eq!(lm.holder_for("R"), Some("t2".to_string()));
        assert_eq!(
            lm.blocked_edges(),
            vec![("t3".to_string(), "t2".to_string())]
        );
    }

    #[test]
    fn reentrant_acquire_does_not_nest() {
        let mut lm = WaiterManager::new();
        lm.acquire("t1", "R");
        assert_eq!(lm.acquire("t1", "R"), (true, None));
        assert!(lm.release("t1", "R"));
        assert_eq!(lm.holder_for("R"), None);
    }

    #[test]
    fn release_by_non_owner_fails_without_side_effects() {
        let mut lm = WaiterManager::new();
        lm.acquire("t1", "R");
        assert!(!lm.release("t2", "R"));
        assert_eq!(lm.holder_for("R"), Some("t1".to_string()));
    }

    #[test]
    fn enqueue_is_idempotent() {
        let mut lm = WaiterManager::new();
        lm.acquire("t1", "R");
        lm.acquire("t2", "R");
        lm.acquire("t2", "R");
        assert_eq!(
            lm.blocked_edges(),
            vec![("t2".to_string(), "t1".to_string())]
        );
    }

    #[test]
    fn abort_of_unknown_tx_is_a_noop() {
        let mut lm = WaiterManager::new();
        assert_eq!(lm.abort("ghost"), 0);
    }

    #[test]
    fn abort_purges_from_every_queue_and_ownership() {
        let mut lm = WaiterManager::new();
        lm.acquire("t1", "R1");
        lm.acquire("t2", "R1");
        lm.acquire("t2", "R2");
        lm.acquire("t1", "R2");
        lm.abort("t1");
        assert_ne!(lm.holder_for("R1"), Some("t1".to_string()));
        assert_ne!(lm.holder_for("R2"), Some("t1".to_string()));
        assert!(lm
            .blocked_edges()
            .iter()
            .all(|(w, _)| w != "t1"));
    }

    #[test]
    fn unknown_tx_age_is_zero() {
        let lm = WaiterManager::new();
        assert_eq!(lm.tx_age_ms("ghost"), 0);
    }
}
