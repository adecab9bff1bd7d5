//! # Committee Metrics
//!
//! Prometheus metrics for instruction processing.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! sc-02-committee-state = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `committee_instructions_total` - Instructions by kind and outcome (applied/skipped/fatal)
//! - `committee_commits_total` - Snapshots published
//! - `committee_members` - Committee size per chain
//! - `committee_epoch` - Epoch of the current snapshot

use crate::domain::state::CommitteeState;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
    IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};

#[cfg(feature = "metrics")]
lazy_static! {
    /// Instructions processed, labeled by kind and outcome
    pub static ref INSTRUCTIONS: IntCounterVec = register_int_counter_vec!(
        "committee_instructions_total",
        "Committee instructions processed",
        &["kind", "outcome"]
    )
    .expect("Failed to create INSTRUCTIONS metric");

    /// Snapshots published
    pub static ref COMMITS: IntCounter = register_int_counter!(
        "committee_commits_total",
        "Committee state snapshots published"
    )
    .expect("Failed to create COMMITS metric");

    /// Committee size per chain
    pub static ref MEMBERS: IntGaugeVec = register_int_gauge_vec!(
        "committee_members",
        "Committee members per chain",
        &["chain"]
    )
    .expect("Failed to create MEMBERS metric");

    /// Epoch of the current snapshot
    pub static ref EPOCH: IntGauge = register_int_gauge!(
        "committee_epoch",
        "Epoch of the published committee state"
    )
    .expect("Failed to create EPOCH metric");
}

#[cfg(feature = "metrics")]
pub fn record_instruction(kind: &str, outcome: &str) {
    INSTRUCTIONS.with_label_values(&[kind, outcome]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_commit() {
    COMMITS.inc();
}

#[cfg(feature = "metrics")]
pub fn observe_state(state: &CommitteeState) {
    EPOCH.set(state.epoch() as i64);
    MEMBERS
        .with_label_values(&["beacon"])
        .set(state.beacon_committee().len() as i64);
    for sid in state.shard_ids() {
        MEMBERS
            .with_label_values(&[&format!("shard-{}", sid)])
            .set(state.shard_committee(sid).len() as i64);
    }
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn record_instruction(_kind: &str, _outcome: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_commit() {}

#[cfg(not(feature = "metrics"))]
pub fn observe_state(_state: &CommitteeState) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_callable() {
        record_instruction("stake", "applied");
        record_commit();
        observe_state(&CommitteeState::new(2));
    }
}
