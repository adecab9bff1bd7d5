//! # Committee Parameters
//!
//! Chain-wide constants and the per-batch environment handed to the
//! instruction processor.

use serde::{Deserialize, Serialize};

use crate::algorithms::swap_rule::SwapRule;

/// Which swap rule is active from a given epoch onwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRuleSchedule {
    /// `(from_epoch, rule)` sorted by epoch.
    entries: Vec<(u64, SwapRule)>,
}

impl SwapRuleSchedule {
    pub fn new(mut entries: Vec<(u64, SwapRule)>) -> Self {
        entries.sort_by_key(|(epoch, _)| *epoch);
        entries.dedup_by_key(|(epoch, _)| *epoch);
        Self { entries }
    }

    /// Single rule for every epoch.
    pub fn fixed(rule: SwapRule) -> Self {
        Self::new(vec![(0, rule)])
    }

    pub fn rule_for(&self, epoch: u64) -> SwapRule {
        self.entries
            .iter()
            .rev()
            .find(|(from, _)| *from <= epoch)
            .map(|(_, rule)| *rule)
            .unwrap_or(SwapRule::Base)
    }

    pub fn entries(&self) -> &[(u64, SwapRule)] {
        &self.entries
    }
}

impl Default for SwapRuleSchedule {
    fn default() -> Self {
        Self::new(vec![(0, SwapRule::Base), (2, SwapRule::Slashing), (10, SwapRule::Dcs)])
    }
}

/// Committee sizing, scoring and epoch timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeParams {
    pub max_beacon_committee_size: usize,
    pub min_beacon_committee_size: usize,
    pub max_shard_committee_size: usize,
    pub min_shard_committee_size: usize,
    pub max_swap_out_percent: u8,
    pub max_swap_in_percent: u8,
    /// Maximum new substitutes per shard per Random.
    pub assign_offset: usize,
    pub default_performing: u64,
    pub slashing_threshold: u64,
    pub active_shards: u16,
    /// Beacon heights per epoch.
    pub epoch_length: u64,
    /// Offset within the epoch at which the Random instruction lands.
    pub random_time_offset: u64,
    /// Epochs during which committees may sit below minimum size.
    pub bootstrap_epochs: u64,
    /// Epochs whose first height is a governance rekey breakpoint.
    pub rekey_epochs: Vec<u64>,
    pub swap_rules: SwapRuleSchedule,
}

impl Default for CommitteeParams {
    fn default() -> Self {
        Self {
            max_beacon_committee_size: 32,
            min_beacon_committee_size: 4,
            max_shard_committee_size: 32,
            min_shard_committee_size: 4,
            max_swap_out_percent: 8,
            max_swap_in_percent: 8,
            assign_offset: 8,
            default_performing: 500,
            slashing_threshold: 200,
            active_shards: 8,
            epoch_length: 350,
            random_time_offset: 175,
            bootstrap_epochs: 1,
            rekey_epochs: Vec::new(),
            swap_rules: SwapRuleSchedule::default(),
        }
    }
}

impl CommitteeParams {
    /// Small committees and short epochs.
    pub fn for_testing() -> Self {
        Self {
            max_beacon_committee_size: 4,
            min_beacon_committee_size: 1,
            max_shard_committee_size: 4,
            min_shard_committee_size: 1,
            max_swap_out_percent: 25,
            max_swap_in_percent: 25,
            assign_offset: 4,
            default_performing: 60,
            slashing_threshold: 10,
            active_shards: 4,
            epoch_length: 10,
            random_time_offset: 5,
            bootstrap_epochs: 0,
            rekey_epochs: Vec::new(),
            swap_rules: SwapRuleSchedule::fixed(SwapRule::Slashing),
        }
    }

    /// Epoch containing `height` (heights and epochs start at 1).
    pub fn epoch_of(&self, height: u64) -> u64 {
        if height == 0 || self.epoch_length == 0 {
            return 1;
        }
        (height - 1) / self.epoch_length + 1
    }

    /// Position of `height` inside its epoch, starting at 1.
    pub fn height_in_epoch(&self, height: u64) -> u64 {
        if height == 0 || self.epoch_length == 0 {
            return 1;
        }
        (height - 1) % self.epoch_length + 1
    }

    pub fn is_random_time(&self, height: u64) -> bool {
        self.height_in_epoch(height) == self.random_time_offset
    }

    pub fn is_last_height_of_epoch(&self, height: u64) -> bool {
        self.height_in_epoch(height) == self.epoch_length
    }
}

/// Inputs to one batch besides the instructions themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEnv {
    pub epoch: u64,
    /// Beacon height of the block carrying the batch.
    pub height: u64,
    pub is_random_time: bool,
    pub is_rekey_breakpoint: bool,
    pub is_bootstrap: bool,
    pub swap_rule: SwapRule,
    pub params: CommitteeParams,
}

impl ProcessEnv {
    /// Environment of the beacon block at `height`.
    pub fn for_height(params: &CommitteeParams, height: u64) -> Self {
        let epoch = params.epoch_of(height);
        Self {
            epoch,
            height,
            is_random_time: params.is_random_time(height),
            is_rekey_breakpoint: params.height_in_epoch(height) == 1
                && params.rekey_epochs.contains(&epoch),
            is_bootstrap: epoch <= params.bootstrap_epochs,
            swap_rule: params.swap_rules.rule_for(epoch),
            params: params.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_lookup() {
        let schedule = SwapRuleSchedule::default();
        assert_eq!(schedule.rule_for(0), SwapRule::Base);
        assert_eq!(schedule.rule_for(1), SwapRule::Base);
        assert_eq!(schedule.rule_for(2), SwapRule::Slashing);
        assert_eq!(schedule.rule_for(9), SwapRule::Slashing);
        assert_eq!(schedule.rule_for(500), SwapRule::Dcs);
    }

    #[test]
    fn test_epoch_arithmetic() {
        let params = CommitteeParams::for_testing();
        assert_eq!(params.epoch_of(1), 1);
        assert_eq!(params.epoch_of(10), 1);
        assert_eq!(params.epoch_of(11), 2);
        assert!(params.is_random_time(5));
        assert!(params.is_random_time(15));
        assert!(params.is_last_height_of_epoch(20));
    }

    #[test]
    fn test_env_for_height() {
        let mut params = CommitteeParams::for_testing();
        params.rekey_epochs = vec![3];
        params.bootstrap_epochs = 1;

        let env = ProcessEnv::for_height(&params, 21);
        assert_eq!(env.epoch, 3);
        assert!(env.is_rekey_breakpoint);
        assert!(!env.is_bootstrap);

        let env = ProcessEnv::for_height(&params, 5);
        assert!(env.is_random_time);
        assert!(env.is_bootstrap);
    }
}
