//! Cross-subsystem integration scenarios.

pub mod committee_flow;
pub mod consensus_flow;
pub mod cross_shard_flow;

use sc_01_signature_aggregation::ValidatorSecrets;
use shared_types::ValidatorKey;

/// Deterministic secrets for test validator `i`.
pub fn secrets(scope: &str, i: usize) -> ValidatorSecrets {
    match ValidatorSecrets::from_seed(format!("{scope}-{i}").as_bytes()) {
        Ok(secrets) => secrets,
        Err(err) => panic!("seed {scope}-{i} rejected: {err}"),
    }
}

/// Public keys of test validator `i`.
pub fn key(scope: &str, i: usize) -> ValidatorKey {
    match secrets(scope, i).validator_key() {
        Ok(key) => key,
        Err(err) => panic!("key {scope}-{i} rejected: {err}"),
    }
}
