//! Outstanding requests and payload validation.

use std::time::Duration;

use shared_types::{hex_short, CrossShardPayload, Hash, ShardId};
use tokio::time::Instant;
use uuid::Uuid;

use super::errors::{CrossShardError, CrossShardResult};

/// A beacon-confirmed source block this shard still needs the payload of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingRequest {
    /// Correlates log lines across re-issues.
    pub id: Uuid,
    pub from_shard: ShardId,
    pub height: u64,
    /// Source block hash confirmed by the beacon chain.
    pub hash: Hash,
    /// Beacon block carrying the confirmation.
    pub beacon_height: u64,
    pub first_asked_at: Instant,
    pub last_sent_at: Option<Instant>,
    pub attempts: u32,
}

impl OutstandingRequest {
    pub fn new(from_shard: ShardId, height: u64, hash: Hash, beacon_height: u64, now: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_shard,
            height,
            hash,
            beacon_height,
            first_asked_at: now,
            last_sent_at: None,
            attempts: 0,
        }
    }

    pub fn is_expired(&self, now: Instant, deadline: Duration) -> bool {
        now.saturating_duration_since(self.first_asked_at) >= deadline
    }

    /// Never sent, or last sent at least `reissue_after` ago.
    pub fn should_send(&self, now: Instant, reissue_after: Duration) -> bool {
        self.last_sent_at
            .map_or(true, |sent| now.saturating_duration_since(sent) >= reissue_after)
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent_at = Some(now);
        self.attempts += 1;
    }

    /// Check `payload` against this confirmation for destination `local`.
    pub fn validate(&self, payload: &CrossShardPayload, local: ShardId) -> CrossShardResult<()> {
        let height = payload.source_block_height();
        if payload.from_shard_id() != Some(self.from_shard) {
            return Err(CrossShardError::unverified(height, "source shard mismatch"));
        }
        if height != self.height {
            return Err(CrossShardError::unverified(
                height,
                format!("expected height {}", self.height),
            ));
        }
        if payload.source_block_hash() != self.hash {
            return Err(CrossShardError::unverified(
                height,
                format!("hash differs from confirmed {}", hex_short(&self.hash)),
            ));
        }
        if payload.to_shard_id != local {
            return Err(CrossShardError::unverified(
                height,
                format!("destined for shard {}", payload.to_shard_id),
            ));
        }
        if !payload.verify_merkle_path() {
            return Err(CrossShardError::unverified(height, "merkle path does not verify"));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use shared_types::{BlockHeader, ChainId, Coin, CrossShardOutputs, CrossShardPayload, Fingerprint};

    /// Payload from `from` at `height` carrying one coin for `to`.
    pub fn payload(from: u8, to: u8, height: u64) -> CrossShardPayload {
        let mut outputs = CrossShardOutputs::new(4);
        outputs.by_destination[usize::from(to)].0.push(Coin(vec![from, to, height as u8]));
        let header = BlockHeader {
            chain: ChainId::Shard(from),
            version: 1,
            height,
            round: 1,
            epoch: 1,
            timestamp: 1_000 * height as i64,
            previous_hash: [height as u8; 32],
            proposer: Fingerprint::from("proposer".to_string()),
            committee_root: [0; 32],
            body_root: [0; 32],
            cross_shard_root: outputs.root(),
            beacon_height: 1,
        };
        outputs
            .payload_for(&header, Vec::new(), to)
            .expect("destination within active shards")
    }
}
