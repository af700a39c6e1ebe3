// Copyright the deadlockd authors. Licensed under Apache-2.0.

//! `LockManager` wires a [`waiter_manager::WaiterManager`] (FIFO
//! exclusive locks) and a [`deadlock::Detector`] (edge-chasing probes)
//! behind a single node-wide lock, mirroring the teacher's own
//! `LockManager` — which likewise combines a `WaiterManager` and a
//! `Detector` as "two components working in two threads" (see the
//! teacher's module doc comment).
//!
//! Here both components share one `parking_lot::Mutex`-guarded state
//! instead of two worker threads talking over channels — the simplest
//! correct design spec.md §5 calls out explicitly ("serializes all
//! state mutations under a single mutex covering the Lock Manager and
//! the `seen` map"). Outbound peer calls (spec.md §5's only
//! suspension points) always happen after the guard is dropped.

pub mod client;
pub mod config;
pub mod deadlock;
pub mod metrics;
pub mod waiter_manager;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

pub use self::client::PeerClient;
pub use self::config::Config;
pub use self::deadlock::{PlanAction, Probe, ProbeReply};
pub use self::waiter_manager::WaiterManager;

use self::deadlock::Detector;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as i64
}

struct State {
    waiter_mgr: WaiterManager,
    detector: Detector,
}

/// Node-local facade over the lock table and the deadlock detector.
/// Cloning shares the same underlying state (`Arc`-backed), matching
/// the teacher's `LockManager: Clone` (its scheduler handles are
/// cheap to clone and share one running worker).
#[derive(Clone)]
pub struct LockManager {
    service_name: Arc<String>,
    state: Arc<Mutex<State>>,
    peer_client: Arc<PeerClient>,
    peers: Arc<Vec<String>>,
}

/// Outcome of an `acquire` call (spec.md §4.1 / §6).
pub struct AcquireOutcome {
    pub granted: bool,
    pub holder: Option<String>,
}

impl LockManager {
    pub fn new(service_name: impl Into<String>, peers: Vec<String>, cfg: Config) -> Self {
        let service_name = service_name.into();
        Self {
            peer_client: Arc::new(PeerClient::new(cfg.peer_call_timeout)),
            state: Arc::new(Mutex::new(State {
                waiter_mgr: WaiterManager::new(),
                detector: Detector::new(service_name.clone(), cfg),
            })),
            service_name: Arc::new(service_name),
            peers: Arc::new(peers),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// `acquire(tx, res)` per spec.md §4.1. When the request blocks,
    /// also triggers probe generation and peer fan-out — the one
    /// non-trivial behavior spec.md §4.3 assigns to the request facade,
    /// implemented here so the outbound call can be issued after the
    /// lock is released rather than from inside the HTTP handler.
    pub async fn acquire(&self, tx: &str, res: &str) -> AcquireOutcome {
        let (granted, holder) = {
            let mut state = self.state.lock();
            state.waiter_mgr.acquire(tx, res)
        };

        metrics::ACQUIRE_TOTAL
            .with_label_values(&[&self.service_name])
            .inc();

        if !granted {
            metrics::BLOCKED_TOTAL
                .with_label_values(&[&self.service_name])
                .inc();
            if let Some(holder_tx) = &holder {
                let probe = {
                    let state = self.state.lock();
                    state.detector.start_probe(tx, holder_tx, now_ms())
                };
                if let Some(probe) = probe {
                    self.peer_client
                        .clone()
                        .broadcast((*self.peers).clone(), "/probe".to_string(), probe)
                        .await;
                }
            }
        }

        AcquireOutcome { granted, holder }
    }

    /// `release(tx, res) -> bool` per spec.md §4.1.
    pub fn release(&self, tx: &str, res: &str) -> bool {
        let ok = self.state.lock().waiter_mgr.release(tx, res);
        if ok {
            metrics::RELEASE_TOTAL
                .with_label_values(&[&self.service_name])
                .inc();
        }
        ok
    }

    /// `abort(tx) -> affected_count` per spec.md §4.1. Total and
    /// idempotent: aborting an unknown tx is a no-op.
    pub fn abort(&self, tx: &str) -> u32 {
        let affected = self.state.lock().waiter_mgr.abort(tx);
        metrics::ABORTS_TOTAL
            .with_label_values(&[&self.service_name])
            .inc();
        affected
    }

    pub fn holder_for(&self, res: &str) -> Option<String> {
        self.state.lock().waiter_mgr.holder_for(res)
    }

    pub fn tx_age_ms(&self, tx: &str) -> u64 {
        self.state.lock().waiter_mgr.tx_age_ms(tx)
    }

    /// Snapshot of every current wait-for edge, for the `/wfg` facade
    /// endpoint (spec.md §9 design notes: "the facade's `/wfg` endpoint
    /// is the only caller that needs a snapshot").
    pub fn blocked_edges(&self) -> Vec<(String, String)> {
        self.state.lock().waiter_mgr.blocked_edges()
    }

    /// `on_probe(p) -> ProbeReply` per spec.md §4.2. Decides the
    /// outcome (and applies any local abort) under the node lock, then
    /// performs the resulting network fan-out, if any, after releasing
    /// it — outbound calls never happen while the lock is held
    /// (spec.md §5).
    pub async fn on_probe(&self, probe: Probe) -> ProbeReply {
        let outcome = {
            let mut state = self.state.lock();
            state.detector.decide_probe(&mut state.waiter_mgr, probe)
        };

        match outcome.action {
            PlanAction::None => {}
            PlanAction::ForwardProbe(fwd) => {
                self.peer_client
                    .clone()
                    .broadcast((*self.peers).clone(), "/probe".to_string(), fwd)
                    .await;
            }
            PlanAction::BroadcastAbort(victim) => {
                metrics::DEADLOCKS_TOTAL
                    .with_label_values(&[&self.service_name])
                    .inc();
                self.peer_client
                    .clone()
                    .broadcast(
                        (*self.peers).clone(),
                        "/abort".to_string(),
                        deadlock::AbortBody { tx: victim },
                    )
                    .await;
            }
        }

        outcome.reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lm() -> LockManager {
        LockManager::new("test", Vec::new(), Config::default())
    }

    #[tokio::test]
    async fn acquire_grants_free_resource() {
        let lm = lm();
        let outcome = lm.acquire("t1", "R").await;
        assert!(outcome.granted);
        assert_eq!(outcome.holder, None);
    }

    #[tokio::test]
    async fn blocked_acquire_reports_current_holder() {
        let lm = lm();
        lm.acquire("t1", "R").await;
        let outcome = lm.acquire("t2", "R").await;
        assert!(!outcome.granted);
        assert_eq!(outcome.holder, Some("t1".to_string()));
        assert_eq!(
            lm.blocked_edges(),
            vec![("t2".to_string(), "t1".to_string())]
        );
    }

    #[tokio::test]
    async fn release_by_non_owner_is_rejected() {
        let lm = lm();
        lm.acquire("t1", "R").await;
        assert!(!lm.release("t2", "R"));
    }

    #[tokio::test]
    async fn abort_transfers_ownership_to_next_waiter() {
        let lm = lm();
        lm.acquire("t1", "R").await;
        lm.acquire("t2", "R").await;
        lm.acquire("t3", "R").await;
        assert!(lm.abort("t1") >= 1);
        assert_eq!(lm.holder_for("R"), Some("t2".to_string()));
    }

    #[tokio::test]
    async fn on_probe_with_no_peers_still_resolves_locally() {
        let lm = lm();
        lm.acquire("old", "R1").await;
        lm.acquire("young", "R2").await;
        lm.acquire("old", "R2").await;
        lm.acquire("young", "R1").await;

        let reply = lm
            .on_probe(Probe {
                initiator_tx: "old".to_string(),
                origin_service: "peer".to_string(),
                current_tx: "old".to_string(),
                current_service: "unknown".to_string(),
                path_digest: 0,
                hops: 2,
                ts_ms: 0,
            })
            .await;
        assert!(reply.deadlock);
    }
}
