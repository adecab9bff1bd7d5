//! Node-level metric recording on the `sc-telemetry` registry.

use sc_02_committee_state::CommitteeState;
use sc_telemetry::metrics::{
    COMMITTEE_EPOCH, COMMITTEE_SIZE, DRIVERS_RUNNING, DRIVER_RESTARTS, INBOUND_DROPPED, SUBSYSTEM_ERRORS,
};
use shared_types::{ChainId, ShardId};

/// `transition` is `start` or `stop`.
pub fn record_driver_transition(chain: ChainId, transition: &str, running: usize) {
    DRIVER_RESTARTS
        .with_label_values(&[&chain.to_string(), transition])
        .inc();
    DRIVERS_RUNNING.set(running as f64);
}

pub fn record_inbound_dropped(reason: &str) {
    INBOUND_DROPPED.with_label_values(&[reason]).inc();
}

pub fn record_committee_state(state: &CommitteeState) {
    COMMITTEE_EPOCH.set(state.epoch() as f64);
    let shards = (0..state.active_shards()).filter_map(|sid| ShardId::try_from(sid).ok());
    for chain in std::iter::once(ChainId::Beacon).chain(shards.map(ChainId::Shard)) {
        COMMITTEE_SIZE
            .with_label_values(&[&chain.to_string()])
            .set(state.committee(chain).len() as f64);
    }
}

pub fn record_error(subsystem: &str, error_type: &str) {
    SUBSYSTEM_ERRORS.with_label_values(&[subsystem, error_type]).inc();
}
