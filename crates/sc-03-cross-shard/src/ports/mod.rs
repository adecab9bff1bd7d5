//! # Ports
//!
//! Views of the beacon chain and the local shard, and the peer transport.

pub mod outbound;

pub use outbound::{BeaconView, CrossShardPeers, MockBeaconView, MockPeers, MockShardView, ShardView};
