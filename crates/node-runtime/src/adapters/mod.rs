//! # Adapter Implementations
//!
//! Concrete implementations of the subsystems' outbound ports for a
//! single-process devnet.
//!
//! - [`InMemoryChain`]: `ChainCollaborator` for the beacon and shard chains
//! - [`LoopbackNetwork`]: `ConsensusNetwork` feeding the node's own inbound queue
//! - [`ChainBeaconView`], [`LocalShardView`], [`LoopbackPeers`]: cross-shard sync ports

pub mod chain;
pub mod cross_shard;
pub mod network;

pub use chain::{ChainTiming, InMemoryChain, ShardBody};
pub use cross_shard::{ChainBeaconView, LocalShardView, LoopbackPeers};
pub use network::LoopbackNetwork;
