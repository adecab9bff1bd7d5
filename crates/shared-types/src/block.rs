//! # Blocks
//!
//! Beacon and shard blocks share one header layout. Shard-only fields
//! (`cross_shard_root`, `beacon_height`) are zero on beacon blocks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::entities::{finalize, keccak256, ChainId, Fingerprint, Hash, ShardId};
use crate::errors::CodecError;

/// Block header. The block hash is the Keccak-256 of the header fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub chain: ChainId,
    pub version: u16,
    pub height: u64,
    pub round: u32,
    pub epoch: u64,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    pub previous_hash: Hash,
    pub proposer: Fingerprint,
    /// `committee_hash` of the committee that signs this block.
    pub committee_root: Hash,
    /// Keccak-256 of the block body.
    pub body_root: Hash,
    /// Merkle root over per-destination cross-shard leaves.
    pub cross_shard_root: Hash,
    /// Beacon height this shard block was built against.
    pub beacon_height: u64,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        let mut hasher = Keccak256::new();
        hasher.update(self.chain.as_wire().to_be_bytes());
        hasher.update(self.version.to_be_bytes());
        hasher.update(self.height.to_be_bytes());
        hasher.update(self.round.to_be_bytes());
        hasher.update(self.epoch.to_be_bytes());
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(self.previous_hash);
        hasher.update((self.proposer.as_str().len() as u32).to_be_bytes());
        hasher.update(self.proposer.as_str().as_bytes());
        hasher.update(self.committee_root);
        hasher.update(self.body_root);
        hasher.update(self.cross_shard_root);
        hasher.update(self.beacon_height.to_be_bytes());
        finalize(hasher)
    }
}

/// Aggregate signature over the block hash plus the signer bitmap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationData {
    pub aggregate_signature: Vec<u8>,
    /// Little-endian bit order, one bit per committee index.
    pub validator_bitmap: Vec<u8>,
    pub committee_len: u32,
    /// Optional secondary-scheme signatures keyed by committee index.
    pub bridge_signatures: Vec<(u32, Vec<u8>)>,
}

impl ValidationData {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// A block as seen by consensus. The body is opaque except on the beacon
/// chain, where it decodes to a [`BeaconBody`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: Vec<u8>,
    pub validation: Option<ValidationData>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn round(&self) -> u32 {
        self.header.round
    }

    pub fn chain(&self) -> ChainId {
        self.header.chain
    }

    /// True when `body_root` commits to `body`.
    pub fn body_matches_root(&self) -> bool {
        keccak256(&self.body) == self.header.body_root
    }
}

// =============================================================================
// BEACON BODY
// =============================================================================

/// Beacon confirmation of one shard block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStateEntry {
    pub height: u64,
    pub hash: Hash,
    /// Destination shards that received cross-shard outputs from this block.
    pub cross_shard_to: Vec<ShardId>,
}

/// Decoded body of a beacon block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBody {
    /// Raw instructions in string-array wire form.
    pub instructions: Vec<Vec<String>>,
    pub shard_states: BTreeMap<ShardId, Vec<ShardStateEntry>>,
}

impl BeaconBody {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// The confirmation entry for `(shard, height)`, if this block has one.
    pub fn shard_entry(&self, shard: ShardId, height: u64) -> Option<&ShardStateEntry> {
        self.shard_states
            .get(&shard)
            .and_then(|entries| entries.iter().find(|e| e.height == height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> BlockHeader {
        BlockHeader {
            chain: ChainId::Shard(1),
            version: 1,
            height: 10,
            round: 1,
            epoch: 2,
            timestamp: 1_700_000_000_000,
            previous_hash: [1; 32],
            proposer: Fingerprint::from("proposer".to_string()),
            committee_root: [2; 32],
            body_root: keccak256(b"body"),
            cross_shard_root: [3; 32],
            beacon_height: 40,
        }
    }

    #[test]
    fn test_header_hash_covers_round() {
        let a = header();
        let mut b = header();
        b.round = 2;
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), header().hash());
    }

    #[test]
    fn test_body_root_check() {
        let block = Block {
            header: header(),
            body: b"body".to_vec(),
            validation: None,
        };
        assert!(block.body_matches_root());
    }

    #[test]
    fn test_beacon_body_shard_entry() {
        let mut body = BeaconBody::default();
        body.shard_states.insert(
            0,
            vec![ShardStateEntry {
                height: 10,
                hash: [9; 32],
                cross_shard_to: vec![1],
            }],
        );
        let decoded = BeaconBody::decode(&body.encode().unwrap()).unwrap();
        assert_eq!(decoded.shard_entry(0, 10).map(|e| e.hash), Some([9; 32]));
        assert!(decoded.shard_entry(0, 11).is_none());
    }
}
