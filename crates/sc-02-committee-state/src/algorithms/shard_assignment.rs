//! # Shard Assignment
//!
//! Places random-time candidates into shard substitute lists.
//!
//! Candidates are visited in fingerprint order. Each goes to the shard
//! minimising `(substitute size, keccak256(random_be ‖ fingerprint ‖ sid), sid)`
//! among shards that still accept newcomers this round. Sizes are updated as
//! candidates are placed, so emptier shards fill first.

use shared_types::{keccak256, ShardId, ValidatorKey};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    /// `(candidate, shard)` in visiting order.
    pub assigned: Vec<(ValidatorKey, ShardId)>,
    /// Candidates that found no shard with spare capacity.
    pub leftover: Vec<ValidatorKey>,
}

/// Tie-break digest for one `(candidate, shard)` pair.
pub fn assignment_hash(random_number: u64, candidate: &ValidatorKey, sid: ShardId) -> [u8; 32] {
    let fingerprint = candidate.fingerprint().as_str().as_bytes();
    let mut preimage = Vec::with_capacity(8 + fingerprint.len() + 1);
    preimage.extend_from_slice(&random_number.to_be_bytes());
    preimage.extend_from_slice(fingerprint);
    preimage.push(sid);
    keccak256(&preimage)
}

/// `substitute_sizes[sid]` is the current substitute length of shard `sid`.
/// At most `assign_offset` candidates land in any one shard.
pub fn assign_candidates(
    candidates: &[ValidatorKey],
    substitute_sizes: &[usize],
    random_number: u64,
    assign_offset: usize,
) -> Assignment {
    let mut sorted: Vec<&ValidatorKey> = candidates.iter().collect();
    sorted.sort_by(|a, b| a.fingerprint().cmp(b.fingerprint()));

    let mut sizes = substitute_sizes.to_vec();
    let mut placed = vec![0usize; sizes.len()];
    let mut result = Assignment::default();

    for candidate in sorted {
        let target = (0..sizes.len())
            .filter(|sid| placed[*sid] < assign_offset)
            .map(|sid| {
                let shard = sid as ShardId;
                (sizes[sid], assignment_hash(random_number, candidate, shard), shard)
            })
            .min();

        match target {
            Some((_, _, shard)) => {
                let idx = usize::from(shard);
                sizes[idx] += 1;
                placed[idx] += 1;
                result.assigned.push((candidate.clone(), shard));
            }
            None => result.leftover.push(candidate.clone()),
        }
    }
    result
}
