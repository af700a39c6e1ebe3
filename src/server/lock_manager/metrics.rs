//! Prometheus counters, label `service`, per spec.md §6.
//!
//! Grounded on the teacher's own `metrics.rs` role and the
//! `lazy_static!` + `register_int_counter_vec!` pattern the teacher
//! uses throughout `tikv_util`/`pd_client` for every other counter it
//! exposes; the `prometheus` crate dependency (and pinned git rev) is
//! carried over unchanged from the teacher's `Cargo.toml`.

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

/// Snapshots the default registry for the `/metrics` facade endpoint.
pub fn registry_gather() -> Vec<prometheus::proto::MetricFamily> {
    prometheus::gather()
}

lazy_static! {
    pub static ref ACQUIRE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "acquire_total",
        "Total acquire attempts",
        &["service"]
    )
    .unwrap();
    pub static ref BLOCKED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "blocked_total",
        "Total blocked acquires",
        &["service"]
    )
    .unwrap();
    pub static ref RELEASE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "release_total",
        "Total releases",
        &["service"]
    )
    .unwrap();
    pub static ref DEADLOCKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "deadlocks_total",
        "Total deadlocks detected",
        &["service"]
    )
    .unwrap();
    pub static ref ABORTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "aborts_total",
        "Total tx aborts",
        &["service"]
    )
    .unwrap();
}
