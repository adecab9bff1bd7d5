//! # BFT Metrics
//!
//! - `bft_rounds_started_total` - Rounds entered, per chain
//! - `bft_votes_total` - Votes by outcome (counted/duplicate/rejected/early)
//! - `bft_proposals_rejected_total` - Proposes ignored
//! - `bft_blocks_finalized_total` - Blocks finalised, per chain
//! - `bft_round_duration_seconds` - Round start to finalisation
//! - `bft_inbox_drops_total` - Inputs evicted or refused by a full inbox

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref ROUNDS_STARTED: IntCounterVec = register_int_counter_vec!(
        "bft_rounds_started_total",
        "Rounds entered by the driver",
        &["chain"]
    )
    .expect("Failed to create ROUNDS_STARTED metric");

    pub static ref VOTES: IntCounterVec = register_int_counter_vec!(
        "bft_votes_total",
        "Votes received by outcome",
        &["outcome"]
    )
    .expect("Failed to create VOTES metric");

    pub static ref PROPOSALS_REJECTED: IntCounter = register_int_counter!(
        "bft_proposals_rejected_total",
        "Proposes ignored for a bad proposer or failed validation"
    )
    .expect("Failed to create PROPOSALS_REJECTED metric");

    pub static ref BLOCKS_FINALIZED: IntCounterVec = register_int_counter_vec!(
        "bft_blocks_finalized_total",
        "Blocks finalised by the driver",
        &["chain"]
    )
    .expect("Failed to create BLOCKS_FINALIZED metric");

    pub static ref ROUND_DURATION: Histogram = register_histogram!(
        "bft_round_duration_seconds",
        "Time from round start to finalisation",
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 40.0]
    )
    .expect("Failed to create ROUND_DURATION metric");

    pub static ref INBOX_DROPS: IntCounterVec = register_int_counter_vec!(
        "bft_inbox_drops_total",
        "Inputs evicted or refused by a full inbox",
        &["kind"]
    )
    .expect("Failed to create INBOX_DROPS metric");
}

#[cfg(feature = "metrics")]
pub fn record_round_started(chain: &str) {
    ROUNDS_STARTED.with_label_values(&[chain]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_vote(outcome: &str) {
    VOTES.with_label_values(&[outcome]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_proposal_rejected() {
    PROPOSALS_REJECTED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_finalized(chain: &str, round_secs: f64) {
    BLOCKS_FINALIZED.with_label_values(&[chain]).inc();
    ROUND_DURATION.observe(round_secs);
}

#[cfg(feature = "metrics")]
pub fn record_inbox_drop(kind: &str) {
    INBOX_DROPS.with_label_values(&[kind]).inc();
}

#[cfg(not(feature = "metrics"))]
pub fn record_round_started(_chain: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_vote(_outcome: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_proposal_rejected() {}

#[cfg(not(feature = "metrics"))]
pub fn record_finalized(_chain: &str, _round_secs: f64) {}

#[cfg(not(feature = "metrics"))]
pub fn record_inbox_drop(_kind: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_callable() {
        record_round_started("beacon");
        record_vote("counted");
        record_proposal_rejected();
        record_finalized("shard-0", 1.5);
        record_inbox_drop("vote");
    }
}
