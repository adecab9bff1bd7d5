//! # Protocol Messages
//!
//! Message kinds exchanged with peers. Framing and transport belong to the
//! network layer; the core only sees these decoded values tagged with the
//! chain they target.

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::cross_shard::CrossShardPayload;
use crate::entities::{ChainId, Fingerprint, Hash, ShardId};

/// A block proposal for `(block.height, block.round)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposeMsg {
    pub chain: ChainId,
    pub proposer: Fingerprint,
    pub block: Block,
}

impl ProposeMsg {
    pub fn height(&self) -> u64 {
        self.block.height()
    }

    pub fn round(&self) -> u32 {
        self.block.round()
    }
}

/// One validator's vote on a proposed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteMsg {
    pub chain: ChainId,
    pub height: u64,
    pub round: u32,
    pub block_hash: Hash,
    pub validator: Fingerprint,
    /// BLS partial signature over `block_hash`.
    pub partial_signature: Vec<u8>,
    /// Optional secp256k1 signature over `block_hash`.
    pub bridge_signature: Option<Vec<u8>>,
    pub timestamp: i64,
}

/// Pull request for cross-shard payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossShardRequest {
    pub shard_from: ShardId,
    pub shard_to: ShardId,
    pub heights: Vec<u64>,
}

/// Every message kind the core consumes or emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    Propose(ProposeMsg),
    Vote(VoteMsg),
    RequestCrossShard(CrossShardRequest),
    CrossShardBlock(CrossShardPayload),
    RequestBeaconBlock { heights: Vec<u64> },
    BeaconBlock(Block),
}

impl WireMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Propose(_) => "propose",
            WireMessage::Vote(_) => "vote",
            WireMessage::RequestCrossShard(_) => "request_cross_shard",
            WireMessage::CrossShardBlock(_) => "cross_shard_block",
            WireMessage::RequestBeaconBlock { .. } => "request_beacon_block",
            WireMessage::BeaconBlock(_) => "beacon_block",
        }
    }
}

/// A message received from the network, tagged with its target chain.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chain: ChainId,
    pub message: WireMessage,
}
