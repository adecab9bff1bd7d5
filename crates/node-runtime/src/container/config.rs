//! # Node Configuration
//!
//! Unified configuration for the node role, consensus timing, committee
//! parameters, cross-shard sync and telemetry.
//!
//! ## Environment Overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SC_ROLE` | `node.role` (`beacon`, `shard`, `auto`, `relay`) |
//! | `SC_SHARD_ID` | `node.shard_id` |
//! | `SC_MINING_SEED` | `node.mining_seed` (hex) |
//! | `SC_ROUND_TIMEOUT_MS` | `consensus.round_timeout` |
//! | `SC_MIN_BLOCK_INTERVAL_MS` | `consensus.min_block_interval` |
//! | `SC_INBOX_CAPACITY` | `consensus.inbox_capacity` |
//! | `SC_ACTIVE_SHARDS` | `committee.active_shards` and `genesis.active_shards` |
//! | `SC_EPOCH_LENGTH` | `committee.epoch_length` |
//!
//! Logging variables (`SC_LOG_LEVEL`, `SC_JSON_LOGS`, ...) are read by
//! [`TelemetryConfig::from_env`]; the service name gets the role appended.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use sc_01_signature_aggregation::ValidatorSecrets;
use sc_02_committee_state::CommitteeParams;
use sc_03_cross_shard::{PoolConfig, SyncConfig};
use sc_04_bft::BftConfig;
use sc_telemetry::TelemetryConfig;
use shared_types::ShardId;
use thiserror::Error;

use crate::genesis::GenesisConfig;

/// Largest number of shards a `u8` shard id can address.
pub const MAX_ACTIVE_SHARDS: u16 = 256;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid consensus timing: {0}")]
    Consensus(String),

    #[error("Role `shard` requires a shard id")]
    MissingShardId,

    #[error("Shard id {shard} out of range (active shards: {active})")]
    ShardOutOfRange { shard: ShardId, active: u16 },

    #[error("Active shards must be between 1 and {MAX_ACTIVE_SHARDS}, got {0}")]
    ActiveShards(u16),

    #[error("{field} must be at most 100, got {value}")]
    Percent { field: &'static str, value: u8 },

    #[error("{chain} committee: minimum size {min} exceeds maximum {max}")]
    CommitteeSizes {
        chain: &'static str,
        min: usize,
        max: usize,
    },

    #[error("Genesis and committee parameters disagree: {0}")]
    Genesis(String),

    #[error("Role `{0}` requires a mining seed (SC_MINING_SEED)")]
    MissingMiningSeed(NodeRole),

    #[error("Invalid mining seed: {0}")]
    InvalidSeed(String),

    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

/// Which chains the node validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeRole {
    /// The beacon driver always runs.
    #[default]
    Beacon,
    /// The configured shard's driver always runs.
    Shard,
    /// Drivers follow committee membership of the local key.
    Auto,
    /// No drivers; the node only relays.
    Relay,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Beacon => "beacon",
            NodeRole::Shard => "shard",
            NodeRole::Auto => "auto",
            NodeRole::Relay => "relay",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "beacon" => Ok(NodeRole::Beacon),
            "shard" => Ok(NodeRole::Shard),
            "auto" => Ok(NodeRole::Auto),
            "relay" => Ok(NodeRole::Relay),
            _ => Err(ConfigError::InvalidValue {
                var: "SC_ROLE",
                value: s.to_string(),
            }),
        }
    }
}

/// Identity and role of this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSection {
    pub role: NodeRole,
    /// Shard validated under role `shard`.
    pub shard_id: Option<ShardId>,
    /// Hex seed the local validator keys are derived from.
    pub mining_seed: Option<String>,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            role: NodeRole::Beacon,
            shard_id: None,
            // Genesis validator 0 of the devnet layout.
            mining_seed: Some(hex::encode(GenesisConfig::default().validator_seed(0))),
        }
    }
}

impl NodeSection {
    /// Local validator secrets, `None` when no seed is configured.
    pub fn secrets(&self) -> Result<Option<ValidatorSecrets>, ConfigError> {
        let Some(seed) = &self.mining_seed else {
            return Ok(None);
        };
        let bytes = hex::decode(seed.trim()).map_err(|e| ConfigError::InvalidSeed(e.to_string()))?;
        if bytes.is_empty() {
            return Err(ConfigError::InvalidSeed("empty seed".into()));
        }
        ValidatorSecrets::from_seed(&bytes)
            .map(Some)
            .map_err(|e| ConfigError::InvalidSeed(e.to_string()))
    }
}

/// Cross-shard pool and sync loop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CrossShardSection {
    pub pool: PoolConfig,
    pub sync: SyncConfig,
}

/// Complete node configuration.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub consensus: BftConfig,
    pub committee: CommitteeParams,
    pub cross_shard: CrossShardSection,
    pub genesis: GenesisConfig,
    pub telemetry: TelemetryConfig,
}

impl NodeConfig {
    /// Tight timings and small committees.
    pub fn for_testing() -> Self {
        let committee = CommitteeParams::for_testing();
        Self {
            node: NodeSection::default(),
            consensus: BftConfig::for_testing(),
            cross_shard: CrossShardSection {
                pool: PoolConfig::for_testing(),
                sync: SyncConfig::for_testing(),
            },
            genesis: GenesisConfig::for_params(&committee),
            committee,
            telemetry: TelemetryConfig::default(),
        }
    }

    /// Defaults overridden by `SC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.telemetry = TelemetryConfig::for_role(&config.node.role.to_string());
        Ok(config)
    }

    /// Apply overrides from any variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(role) = lookup("SC_ROLE") {
            self.node.role = role.parse()?;
        }
        if let Some(shard) = parse_var::<ShardId, _>(&lookup, "SC_SHARD_ID")? {
            self.node.shard_id = Some(shard);
        }
        if let Some(seed) = lookup("SC_MINING_SEED") {
            self.node.mining_seed = (!seed.trim().is_empty()).then_some(seed);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SC_ROUND_TIMEOUT_MS")? {
            self.consensus.round_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SC_MIN_BLOCK_INTERVAL_MS")? {
            self.consensus.min_block_interval = Duration::from_millis(ms);
        }
        if let Some(capacity) = parse_var::<usize, _>(&lookup, "SC_INBOX_CAPACITY")? {
            self.consensus.inbox_capacity = capacity;
        }
        if let Some(shards) = parse_var::<u16, _>(&lookup, "SC_ACTIVE_SHARDS")? {
            self.committee.active_shards = shards;
            self.genesis.active_shards = shards;
        }
        if let Some(length) = parse_var::<u64, _>(&lookup, "SC_EPOCH_LENGTH")? {
            self.committee.epoch_length = length;
        }
        Ok(())
    }

    /// Reject missing or contradictory parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.consensus
            .validate()
            .map_err(|e| ConfigError::Consensus(e.to_string()))?;

        let committee = &self.committee;
        if committee.active_shards == 0 || committee.active_shards > MAX_ACTIVE_SHARDS {
            return Err(ConfigError::ActiveShards(committee.active_shards));
        }
        for (field, value) in [
            ("max_swap_out_percent", committee.max_swap_out_percent),
            ("max_swap_in_percent", committee.max_swap_in_percent),
        ] {
            if value > 100 {
                return Err(ConfigError::Percent { field, value });
            }
        }
        for (chain, min, max) in [
            (
                "beacon",
                committee.min_beacon_committee_size,
                committee.max_beacon_committee_size,
            ),
            (
                "shard",
                committee.min_shard_committee_size,
                committee.max_shard_committee_size,
            ),
        ] {
            if min > max {
                return Err(ConfigError::CommitteeSizes { chain, min, max });
            }
        }

        if self.genesis.active_shards != committee.active_shards {
            return Err(ConfigError::Genesis(format!(
                "genesis has {} shards, committee parameters {}",
                self.genesis.active_shards, committee.active_shards
            )));
        }
        self.genesis
            .validate()
            .map_err(|e| ConfigError::Genesis(e.to_string()))?;

        match (self.node.role, self.node.shard_id) {
            (NodeRole::Shard, None) => return Err(ConfigError::MissingShardId),
            (NodeRole::Shard, Some(shard)) if u16::from(shard) >= committee.active_shards => {
                return Err(ConfigError::ShardOutOfRange {
                    shard,
                    active: committee.active_shards,
                })
            }
            _ => {}
        }

        if self.node.role != NodeRole::Relay && self.node.mining_seed.is_none() {
            return Err(ConfigError::MissingMiningSeed(self.node.role));
        }
        self.node.secrets()?;
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}
