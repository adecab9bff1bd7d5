//! # Staker Info

use serde::{Deserialize, Serialize};
use shared_types::ShardId;

/// Attributes attached to a staked validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerInfo {
    pub staked_amount: u64,
    pub reward_receiver: String,
    pub performance: u64,
    pub auto_stake: bool,
    /// Set at genesis only.
    pub fixed_node: bool,
    pub unstake_requested: bool,
    /// Shard the validator was last assigned to.
    pub shard_hint: Option<ShardId>,
}

impl StakerInfo {
    pub fn new(
        staked_amount: u64,
        reward_receiver: impl Into<String>,
        auto_stake: bool,
        performance: u64,
    ) -> Self {
        Self {
            staked_amount,
            reward_receiver: reward_receiver.into(),
            performance,
            auto_stake,
            fixed_node: false,
            unstake_requested: false,
            shard_hint: None,
        }
    }

    /// A protected genesis member.
    pub fn fixed(staked_amount: u64, reward_receiver: impl Into<String>, performance: u64) -> Self {
        Self {
            fixed_node: true,
            ..Self::new(staked_amount, reward_receiver, true, performance)
        }
    }

    pub fn with_performance(mut self, performance: u64) -> Self {
        self.performance = performance;
        self
    }

    /// `floor(sqrt(staked_amount))`.
    pub fn voting_power(&self) -> u64 {
        isqrt(self.staked_amount)
    }
}

pub(crate) fn isqrt(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    // Newton iteration from an upper bound.
    let mut x = n;
    let mut y = x / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(3), 1);
        assert_eq!(isqrt(4), 2);
        assert_eq!(isqrt(99), 9);
        assert_eq!(isqrt(100), 10);
        assert_eq!(isqrt(u64::MAX), 4_294_967_295);
    }

    #[test]
    fn test_fixed_node_defaults() {
        let info = StakerInfo::fixed(1750, "rr", 60);
        assert!(info.fixed_node);
        assert!(info.auto_stake);
        assert_eq!(info.voting_power(), 41);
    }
}
