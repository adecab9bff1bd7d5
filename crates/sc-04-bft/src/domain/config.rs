//! Driver timing configuration.

use std::time::Duration;

use super::errors::{ConsensusError, ConsensusResult};

/// Inboxes smaller than this cannot absorb a full committee's votes for
/// two rounds.
pub const MIN_INBOX_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BftConfig {
    /// Wait for a propose, and for votes after it, before the round moves on.
    pub round_timeout: Duration,
    /// Minimum spacing between consecutive blocks.
    pub min_block_interval: Duration,
    /// Assumed one-way delivery bound.
    pub max_network_delay: Duration,
    /// Budget handed to the chain for building a block.
    pub max_block_create_time: Duration,
    /// How often the driver re-reads the chain view and re-broadcasts.
    pub tick_interval: Duration,
    pub inbox_capacity: usize,
    pub block_version: u16,
}

impl Default for BftConfig {
    fn default() -> Self {
        Self {
            round_timeout: Duration::from_secs(20),
            min_block_interval: Duration::from_secs(10),
            max_network_delay: Duration::from_secs(2),
            max_block_create_time: Duration::from_secs(5),
            tick_interval: Duration::from_millis(500),
            inbox_capacity: 256,
            block_version: 1,
        }
    }
}

impl BftConfig {
    pub fn for_testing() -> Self {
        Self {
            round_timeout: Duration::from_secs(3),
            min_block_interval: Duration::from_secs(1),
            max_network_delay: Duration::from_millis(500),
            max_block_create_time: Duration::from_millis(500),
            tick_interval: Duration::from_millis(50),
            inbox_capacity: MIN_INBOX_CAPACITY,
            block_version: 1,
        }
    }

    pub fn validate(&self) -> ConsensusResult<()> {
        let floor = self.min_block_interval + self.max_network_delay * 2;
        if self.round_timeout < floor {
            return Err(ConsensusError::InvalidConfig(format!(
                "round_timeout {:?} below min_block_interval + 2 x max_network_delay ({:?})",
                self.round_timeout, floor
            )));
        }
        if self.inbox_capacity < MIN_INBOX_CAPACITY {
            return Err(ConsensusError::InvalidConfig(format!(
                "inbox_capacity {} below {}",
                self.inbox_capacity, MIN_INBOX_CAPACITY
            )));
        }
        if self.tick_interval.is_zero() {
            return Err(ConsensusError::InvalidConfig("tick_interval must be positive".into()));
        }
        Ok(())
    }

    pub fn round_timeout_ms(&self) -> i64 {
        duration_ms(self.round_timeout)
    }
}

pub(crate) fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
