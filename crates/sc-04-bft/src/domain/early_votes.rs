//! Votes that arrive before their proposal.

use std::collections::BTreeMap;

use shared_types::VoteMsg;

/// Buffer keyed by `(height, round)`. Entries older than one round timeout
/// are purged by the driver tick.
///
/// Each slot holds at most one vote per validator and at most `slot_limit`
/// votes, so unverified votes for one round cannot crowd out the others. A
/// vote shadowed by an earlier one with the same fingerprint is not lost
/// for good: members re-broadcast their vote every tick while committing.
#[derive(Debug, Default)]
pub struct EarlyVoteBuffer {
    capacity: usize,
    len: usize,
    votes: BTreeMap<(u64, u32), Vec<(i64, VoteMsg)>>,
}

impl EarlyVoteBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            len: 0,
            votes: BTreeMap::new(),
        }
    }

    /// Returns false when the vote was dropped: the buffer or its slot is
    /// full, or another vote from the same validator is already held.
    pub fn push(&mut self, vote: VoteMsg, received_at_ms: i64, slot_limit: usize) -> bool {
        let slot = self.votes.entry((vote.height, vote.round)).or_default();
        if let Some((_, held)) = slot.iter().find(|(_, held)| held.validator == vote.validator) {
            return *held == vote;
        }
        if slot.len() >= slot_limit || self.len >= self.capacity {
            if slot.is_empty() {
                self.votes.remove(&(vote.height, vote.round));
            }
            return false;
        }
        slot.push((received_at_ms, vote));
        self.len += 1;
        true
    }

    /// Remove and return the votes for `(height, round)` in arrival order.
    pub fn take(&mut self, height: u64, round: u32) -> Vec<VoteMsg> {
        let taken = self.votes.remove(&(height, round)).unwrap_or_default();
        self.len -= taken.len();
        taken.into_iter().map(|(_, vote)| vote).collect()
    }

    /// Drop votes received before `cutoff_ms` or for heights below
    /// `min_height`. Returns how many were dropped.
    pub fn purge(&mut self, cutoff_ms: i64, min_height: u64) -> usize {
        let before = self.len;
        self.votes.retain(|(height, _), slot| {
            if *height < min_height {
                return false;
            }
            slot.retain(|(received, _)| *received >= cutoff_ms);
            !slot.is_empty()
        });
        self.len = self.votes.values().map(Vec::len).sum();
        before - self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{ChainId, Fingerprint};

    fn vote(height: u64, round: u32, who: &str) -> VoteMsg {
        VoteMsg {
            chain: ChainId::Beacon,
            height,
            round,
            block_hash: [1; 32],
            validator: Fingerprint::from(who.to_string()),
            partial_signature: vec![0; 48],
            bridge_signature: None,
            timestamp: 0,
        }
    }

    #[test]
    fn test_take_by_height_round() {
        let mut buffer = EarlyVoteBuffer::new(16);
        assert!(buffer.push(vote(10, 1, "a"), 0, 4));
        assert!(buffer.push(vote(10, 1, "b"), 5, 4));
        assert!(buffer.push(vote(10, 2, "a"), 5, 4));
        assert!(buffer.push(vote(10, 1, "a"), 6, 4));
        assert_eq!(buffer.len(), 3);

        let taken = buffer.take(10, 1);
        assert_eq!(taken.len(), 2);
        assert_eq!(buffer.len(), 1);
        assert!(buffer.take(10, 1).is_empty());
    }

    #[test]
    fn test_purge_by_age_and_height() {
        let mut buffer = EarlyVoteBuffer::new(16);
        buffer.push(vote(9, 1, "a"), 1_000, 4);
        buffer.push(vote(10, 1, "a"), 100, 4);
        buffer.push(vote(10, 1, "b"), 2_000, 4);
        assert_eq!(buffer.purge(1_000, 10), 2);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_capacity_bound() {
        let mut buffer = EarlyVoteBuffer::new(1);
        assert!(buffer.push(vote(1, 1, "a"), 0, 4));
        assert!(!buffer.push(vote(1, 1, "b"), 0, 4));
        assert!(!buffer.push(vote(1, 2, "b"), 0, 4));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_one_vote_per_validator_per_slot() {
        let mut buffer = EarlyVoteBuffer::new(16);
        assert!(buffer.push(vote(5, 1, "a"), 0, 4));
        let mut conflicting = vote(5, 1, "a");
        conflicting.block_hash = [9; 32];
        assert!(!buffer.push(conflicting, 1, 4));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.take(5, 1)[0].block_hash, [1; 32]);
    }

    #[test]
    fn test_flooded_slot_leaves_room_for_other_rounds() {
        let mut buffer = EarlyVoteBuffer::new(16);
        for i in 0..10 {
            buffer.push(vote(5, 1, &format!("forged-{i}")), 0, 4);
        }
        assert_eq!(buffer.len(), 4);

        for who in ["a", "b", "c"] {
            assert!(buffer.push(vote(5, 2, who), 0, 4));
        }
        assert_eq!(buffer.take(5, 2).len(), 3);
    }
}
