//! # Chain View
//!
//! An immutable snapshot of one chain's progress, read once per round. The
//! driver never calls back into the chain for height or committee while a
//! round runs.

use std::time::Duration;

use shared_types::{ChainId, Fingerprint, Hash, ValidatorKey};

use super::config::duration_ms;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainView {
    pub chain: ChainId,
    pub current_height: u64,
    pub last_block_hash: Hash,
    /// Milliseconds since the unix epoch.
    pub last_block_timestamp: i64,
    pub min_block_interval: Duration,
    pub max_block_create_time: Duration,
    /// Proposer rotation order.
    pub committee: Vec<ValidatorKey>,
    /// Committee that signs the next block when it differs from
    /// `committee` (across an epoch boundary). Empty otherwise.
    pub pending_committee: Vec<ValidatorKey>,
    pub last_proposer_index: usize,
}

impl ChainView {
    pub fn next_height(&self) -> u64 {
        self.current_height + 1
    }

    /// Committee whose votes finalise the next block.
    pub fn signing_committee(&self) -> &[ValidatorKey] {
        if self.pending_committee.is_empty() {
            &self.committee
        } else {
            &self.pending_committee
        }
    }

    /// Round in force at `now_ms`.
    pub fn round_at(&self, now_ms: i64, round_timeout: Duration) -> u32 {
        round_at(
            now_ms,
            self.last_block_timestamp,
            duration_ms(self.min_block_interval),
            duration_ms(round_timeout),
        )
    }

    pub fn proposer_for(&self, round: u32) -> Option<&ValidatorKey> {
        proposer_index(self.last_proposer_index, round, self.committee.len())
            .and_then(|index| self.committee.get(index))
    }

    /// The minimum interval since the last block has passed.
    pub fn can_propose_at(&self, now_ms: i64) -> bool {
        now_ms >= self.last_block_timestamp.saturating_add(duration_ms(self.min_block_interval))
    }
}

/// `1 + max(0, (now - last - min_interval) / timeout)`.
pub fn round_at(now_ms: i64, last_block_ms: i64, min_interval_ms: i64, round_timeout_ms: i64) -> u32 {
    let elapsed = now_ms
        .saturating_sub(last_block_ms)
        .saturating_sub(min_interval_ms);
    if elapsed <= 0 || round_timeout_ms <= 0 {
        return 1;
    }
    u32::try_from(elapsed / round_timeout_ms)
        .unwrap_or(u32::MAX - 1)
        .saturating_add(1)
}

/// `(last_proposer_index + round) mod n`, `None` for an empty committee.
pub fn proposer_index(last_proposer_index: usize, round: u32, committee_len: usize) -> Option<usize> {
    if committee_len == 0 {
        return None;
    }
    let round = round as usize % committee_len;
    Some((last_proposer_index % committee_len + round) % committee_len)
}

/// What the driver asks a chain to build.
#[derive(Debug, Clone)]
pub struct BlockRequest {
    pub version: u16,
    pub proposer: Fingerprint,
    pub round: u32,
    /// Milliseconds since the unix epoch.
    pub start_time: i64,
    pub committee: Vec<ValidatorKey>,
    pub previous_hash: Hash,
}
