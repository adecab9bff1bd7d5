//! # Cross-Shard Metrics
//!
//! Prometheus metrics for the sync process, behind the `metrics` feature.
//!
//! - `xshard_requests_total` - Pull requests sent to peers
//! - `xshard_payloads_total` - Payloads by outcome (validated/rejected)
//! - `xshard_expired_total` - Requests dropped at their deadline
//! - `xshard_outstanding` - Outstanding requests
//! - `xshard_pool_size` - Payloads held by the pool

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref REQUESTS: IntCounter = register_int_counter!(
        "xshard_requests_total",
        "Cross-shard pull requests sent to peers"
    )
    .expect("Failed to create REQUESTS metric");

    pub static ref PAYLOADS: IntCounterVec = register_int_counter_vec!(
        "xshard_payloads_total",
        "Cross-shard payloads by validation outcome",
        &["outcome"]
    )
    .expect("Failed to create PAYLOADS metric");

    pub static ref EXPIRED: IntCounter = register_int_counter!(
        "xshard_expired_total",
        "Cross-shard requests dropped at their deadline"
    )
    .expect("Failed to create EXPIRED metric");

    pub static ref OUTSTANDING: IntGauge = register_int_gauge!(
        "xshard_outstanding",
        "Outstanding cross-shard requests"
    )
    .expect("Failed to create OUTSTANDING metric");

    pub static ref POOL_SIZE: IntGauge = register_int_gauge!(
        "xshard_pool_size",
        "Payloads held by the cross-shard pool"
    )
    .expect("Failed to create POOL_SIZE metric");
}

#[cfg(feature = "metrics")]
pub fn record_request() {
    REQUESTS.inc();
}

#[cfg(feature = "metrics")]
pub fn record_payload(outcome: &str) {
    PAYLOADS.with_label_values(&[outcome]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_expired() {
    EXPIRED.inc();
}

#[cfg(feature = "metrics")]
pub fn set_sizes(outstanding: usize, pool: usize) {
    OUTSTANDING.set(outstanding as i64);
    POOL_SIZE.set(pool as i64);
}

#[cfg(not(feature = "metrics"))]
pub fn record_request() {}

#[cfg(not(feature = "metrics"))]
pub fn record_payload(_outcome: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_expired() {}

#[cfg(not(feature = "metrics"))]
pub fn set_sizes(_outstanding: usize, _pool: usize) {}
