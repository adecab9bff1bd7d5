//! # Cross-Shard Payloads
//!
//! A [`CrossShardPayload`] is the persisted `CrossShardBlock`: the source
//! shard header, the outputs destined for one shard, and a Merkle path
//! from that destination's leaf to `header.cross_shard_root`.
//!
//! The canonical encoding sorts token payloads by property id. Decoding
//! rejects any other order so that equal logical payloads always share one
//! byte representation.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::block::BlockHeader;
use crate::entities::{finalize, Hash, ShardId};
use crate::errors::CodecError;
use crate::merkle;

/// Opaque output coin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin(pub Vec<u8>);

/// Outputs of one custom token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub property_id: Hash,
    pub name: String,
    pub symbol: String,
    pub amount: u64,
    pub output_coins: Vec<Coin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossShardPayload {
    /// Encoded [`crate::ValidationData`] of the source block.
    pub validation_data: Vec<u8>,
    pub header: BlockHeader,
    pub to_shard_id: ShardId,
    pub merkle_path: Vec<Hash>,
    pub output_coins: Vec<Coin>,
    pub token_payloads: Vec<TokenPayload>,
}

impl CrossShardPayload {
    /// Source shard, or `None` when the header is not a shard header.
    pub fn from_shard_id(&self) -> Option<ShardId> {
        self.header.chain.shard_id()
    }

    pub fn source_block_height(&self) -> u64 {
        self.header.height
    }

    pub fn source_block_hash(&self) -> Hash {
        self.header.hash()
    }

    /// Leaf this payload occupies in the source block's cross-shard tree.
    pub fn leaf(&self) -> Hash {
        outputs_leaf(self.to_shard_id, &self.output_coins, &self.token_payloads)
    }

    /// Check `merkle_path` against the header's cross-shard root.
    pub fn verify_merkle_path(&self) -> bool {
        merkle::verify_proof(
            &self.leaf(),
            usize::from(self.to_shard_id),
            &self.merkle_path,
            &self.header.cross_shard_root,
        )
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut canonical = self.clone();
        canonical.token_payloads.sort_by(|a, b| a.property_id.cmp(&b.property_id));
        bincode::serialize(&canonical).map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let payload: CrossShardPayload = bincode::deserialize(bytes)?;
        let sorted = payload
            .token_payloads
            .windows(2)
            .all(|w| w[0].property_id <= w[1].property_id);
        if !sorted {
            return Err(CodecError::NonCanonical(
                "token payloads not sorted by property id".to_string(),
            ));
        }
        Ok(payload)
    }
}

/// Leaf committing one destination shard's outputs. Token payloads are
/// hashed in property-id order regardless of input order.
pub fn outputs_leaf(to_shard: ShardId, coins: &[Coin], tokens: &[TokenPayload]) -> Hash {
    let mut sorted: Vec<&TokenPayload> = tokens.iter().collect();
    sorted.sort_by(|a, b| a.property_id.cmp(&b.property_id));

    let mut hasher = Keccak256::new();
    hasher.update([to_shard]);
    hash_coins(&mut hasher, coins);
    hasher.update((sorted.len() as u64).to_be_bytes());
    for token in sorted {
        hasher.update(token.property_id);
        hasher.update((token.name.len() as u64).to_be_bytes());
        hasher.update(token.name.as_bytes());
        hasher.update((token.symbol.len() as u64).to_be_bytes());
        hasher.update(token.symbol.as_bytes());
        hasher.update(token.amount.to_be_bytes());
        hash_coins(&mut hasher, &token.output_coins);
    }
    finalize(hasher)
}

fn hash_coins(hasher: &mut Keccak256, coins: &[Coin]) {
    hasher.update((coins.len() as u64).to_be_bytes());
    for coin in coins {
        hasher.update((coin.0.len() as u64).to_be_bytes());
        hasher.update(&coin.0);
    }
}

/// Outputs of one shard block grouped by destination shard.
#[derive(Debug, Clone, Default)]
pub struct CrossShardOutputs {
    pub by_destination: Vec<(Vec<Coin>, Vec<TokenPayload>)>,
}

impl CrossShardOutputs {
    /// Empty outputs for `active_shards` destinations.
    pub fn new(active_shards: usize) -> Self {
        Self {
            by_destination: vec![(Vec::new(), Vec::new()); active_shards],
        }
    }

    pub fn leaves(&self) -> Vec<Hash> {
        self.by_destination
            .iter()
            .enumerate()
            .map(|(sid, (coins, tokens))| outputs_leaf(sid as ShardId, coins, tokens))
            .collect()
    }

    pub fn root(&self) -> Hash {
        merkle::compute_root(&self.leaves())
    }

    /// Destinations with at least one output.
    pub fn destinations(&self) -> Vec<ShardId> {
        self.by_destination
            .iter()
            .enumerate()
            .filter(|(_, (coins, tokens))| !coins.is_empty() || !tokens.is_empty())
            .map(|(sid, _)| sid as ShardId)
            .collect()
    }

    /// Build the payload for `to_shard` once the header is final.
    pub fn payload_for(
        &self,
        header: &BlockHeader,
        validation_data: Vec<u8>,
        to_shard: ShardId,
    ) -> Option<CrossShardPayload> {
        let (coins, tokens) = self.by_destination.get(usize::from(to_shard))?;
        let merkle_path = merkle::build_proof(&self.leaves(), usize::from(to_shard))?;
        Some(CrossShardPayload {
            validation_data,
            header: header.clone(),
            to_shard_id: to_shard,
            merkle_path,
            output_coins: coins.clone(),
            token_payloads: tokens.clone(),
        })
    }
}
