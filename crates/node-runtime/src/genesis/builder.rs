//! # Genesis Committee Builder
//!
//! Creates the genesis committee state for a devnet. Validator `i` derives
//! its keys from the seed `"{seed_prefix}-{i}"`; validators fill the beacon
//! committee first, then each shard committee in shard order.

use std::time::{SystemTime, UNIX_EPOCH};

use sc_01_signature_aggregation::ValidatorSecrets;
use sc_02_committee_state::{CommitteeParams, CommitteeState, StakerInfo};
use shared_types::{ChainId, ShardId, ValidatorKey};
use thiserror::Error;

/// Genesis creation errors.
#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("Invalid genesis configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to derive validator {index} keys: {reason}")]
    KeyDerivation { index: usize, reason: String },

    #[error("Failed to build genesis state: {0}")]
    StateInitFailed(String),
}

/// Genesis committee layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisConfig {
    pub seed_prefix: String,
    pub beacon_committee_size: usize,
    pub shard_committee_size: usize,
    pub active_shards: u16,
    pub stake: u64,
    pub performance: u64,
    /// Unix milliseconds. If None, uses current time.
    pub timestamp_ms: Option<i64>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self::for_params(&CommitteeParams::default())
    }
}

impl GenesisConfig {
    /// One validator per chain, shaped to `params`.
    pub fn for_params(params: &CommitteeParams) -> Self {
        Self {
            seed_prefix: "shardline-devnet".to_string(),
            beacon_committee_size: 1,
            shard_committee_size: 1,
            active_shards: params.active_shards,
            stake: 1_750_000_000_000,
            performance: params.default_performing,
            timestamp_ms: None,
        }
    }

    pub fn validate(&self) -> Result<(), GenesisError> {
        if self.seed_prefix.is_empty() {
            return Err(GenesisError::InvalidConfig("empty seed prefix".into()));
        }
        if self.active_shards == 0 || self.active_shards > 256 {
            return Err(GenesisError::InvalidConfig(format!(
                "active shards {} out of range",
                self.active_shards
            )));
        }
        if self.beacon_committee_size == 0 || self.shard_committee_size == 0 {
            return Err(GenesisError::InvalidConfig(
                "every chain needs at least one committee member".into(),
            ));
        }
        Ok(())
    }

    pub fn validator_count(&self) -> usize {
        self.beacon_committee_size + usize::from(self.active_shards) * self.shard_committee_size
    }

    pub fn validator_seed(&self, index: usize) -> Vec<u8> {
        format!("{}-{}", self.seed_prefix, index).into_bytes()
    }

    pub fn validator_secrets(&self, index: usize) -> Result<ValidatorSecrets, GenesisError> {
        ValidatorSecrets::from_seed(&self.validator_seed(index)).map_err(|e| GenesisError::KeyDerivation {
            index,
            reason: e.to_string(),
        })
    }

    /// Chain whose genesis committee holds validator `index`.
    pub fn chain_of(&self, index: usize) -> Option<ChainId> {
        if index < self.beacon_committee_size {
            return Some(ChainId::Beacon);
        }
        if index >= self.validator_count() {
            return None;
        }
        let shard = (index - self.beacon_committee_size) / self.shard_committee_size;
        ShardId::try_from(shard).ok().map(ChainId::Shard)
    }
}

/// The genesis committee state plus the keys it was built from.
#[derive(Debug, Clone)]
pub struct Genesis {
    pub state: CommitteeState,
    /// Genesis validators by index.
    pub validators: Vec<ValidatorKey>,
    pub timestamp_ms: i64,
}

/// Builder for the genesis committee state.
pub struct GenesisBuilder {
    config: GenesisConfig,
}

impl GenesisBuilder {
    pub fn new(config: GenesisConfig) -> Self {
        Self { config }
    }

    pub fn build(self) -> Result<Genesis, GenesisError> {
        self.config.validate()?;

        let timestamp_ms = self.config.timestamp_ms.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
                .unwrap_or(0)
        });

        let validators = (0..self.config.validator_count())
            .map(|index| {
                self.config
                    .validator_secrets(index)?
                    .validator_key()
                    .map_err(|e| GenesisError::KeyDerivation {
                        index,
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = CommitteeState::builder(self.config.active_shards);
        let mut position_in_chain = 0usize;
        let mut previous_chain = None;
        for (index, key) in validators.iter().enumerate() {
            let chain = self
                .config
                .chain_of(index)
                .ok_or_else(|| GenesisError::InvalidConfig(format!("validator {index} has no chain")))?;
            if previous_chain != Some(chain) {
                position_in_chain = 0;
                previous_chain = Some(chain);
            }
            // The first member of every chain is a fixed node.
            let receiver = key.fingerprint().short().to_string();
            let info = if position_in_chain == 0 {
                StakerInfo::fixed(self.config.stake, receiver, self.config.performance)
            } else {
                StakerInfo::new(self.config.stake, receiver, true, self.config.performance)
            };
            builder = match chain {
                ChainId::Beacon => builder.beacon_committee(key.clone(), info),
                ChainId::Shard(sid) => builder.shard_committee(sid, key.clone(), info),
            };
            position_in_chain += 1;
        }

        let state = builder
            .epoch(1)
            .build()
            .map_err(|e| GenesisError::StateInitFailed(e.to_string()))?;

        Ok(Genesis {
            state,
            validators,
            timestamp_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> GenesisConfig {
        GenesisConfig {
            beacon_committee_size: 2,
            shard_committee_size: 1,
            active_shards: 2,
            timestamp_ms: Some(1_700_000_000_000),
            ..GenesisConfig::default()
        }
    }

    #[test]
    fn test_genesis_layout() {
        let genesis = GenesisBuilder::new(small()).build().unwrap();
        let state = &genesis.state;

        assert_eq!(genesis.validators.len(), 4);
        assert_eq!(state.beacon_committee(), &genesis.validators[..2]);
        assert_eq!(state.shard_committee(0), &genesis.validators[2..3]);
        assert_eq!(state.shard_committee(1), &genesis.validators[3..4]);
        assert_eq!(genesis.timestamp_ms, 1_700_000_000_000);

        let first = state.staker_info(genesis.validators[0].fingerprint()).unwrap();
        let second = state.staker_info(genesis.validators[1].fingerprint()).unwrap();
        assert!(first.fixed_node);
        assert!(!second.fixed_node);
    }

    #[test]
    fn test_genesis_deterministic() {
        let a = GenesisBuilder::new(small()).build().unwrap();
        let b = GenesisBuilder::new(small()).build().unwrap();
        assert_eq!(a.validators, b.validators);
        assert_eq!(a.state.commitments(), b.state.commitments());
    }

    #[test]
    fn test_chain_of() {
        let config = small();
        assert_eq!(config.chain_of(1), Some(ChainId::Beacon));
        assert_eq!(config.chain_of(2), Some(ChainId::Shard(0)));
        assert_eq!(config.chain_of(3), Some(ChainId::Shard(1)));
        assert_eq!(config.chain_of(4), None);
    }

    #[test]
    fn test_config_validation() {
        let mut config = small();
        config.shard_committee_size = 0;
        assert!(matches!(config.validate(), Err(GenesisError::InvalidConfig(_))));

        let mut config = small();
        config.active_shards = 0;
        assert!(GenesisBuilder::new(config).build().is_err());
    }
}
