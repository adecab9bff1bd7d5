//! # Outbound Ports (Driven Ports)
//!
//! What the sync process needs from the rest of the node.
//!
//! Production: beacon chain and shard chain adapters, the P2P layer.
//! Testing: `MockBeaconView`, `MockShardView`, `MockPeers` (below).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{
    keccak256, BeaconBody, Block, BlockHeader, ChainId, CrossShardPayload, CrossShardRequest,
    Fingerprint, NetworkError, ShardId, ShardStateEntry,
};
use tokio::sync::mpsc;

use crate::domain::errors::CrossShardResult;

/// Read access to the beacon chain.
#[async_trait]
pub trait BeaconView: Send + Sync {
    async fn active_shards(&self) -> u16;

    /// Lowest height `>= start` of a `from` block the beacon chain confirmed
    /// with outputs for `to`, or 0 when there is none yet.
    async fn next_cross_shard_height(&self, from: ShardId, to: ShardId, start: u64) -> CrossShardResult<u64>;

    /// Beacon block whose shard states confirm `from` at `height`.
    async fn confirming_block(&self, from: ShardId, height: u64) -> CrossShardResult<Option<Block>>;
}

/// Read access to the local shard chain.
#[async_trait]
pub trait ShardView: Send + Sync {
    fn shard_id(&self) -> ShardId;

    /// Highest `from` height whose payload a local block already consumed.
    async fn last_requested_height(&self, from: ShardId) -> u64;
}

/// Streaming pull of cross-shard payloads from peers.
#[async_trait]
pub trait CrossShardPeers: Send + Sync {
    /// The receiver yields whatever peers send back and closes when they
    /// are done.
    async fn request_cross_shard(
        &self,
        request: CrossShardRequest,
    ) -> Result<mpsc::Receiver<CrossShardPayload>, NetworkError>;
}

// =============================================================================
// MOCKS
// =============================================================================

/// Beacon view over an explicit table of confirmations.
pub struct MockBeaconView {
    active_shards: u16,
    confirmations: RwLock<BTreeMap<(ShardId, u64), (ShardStateEntry, Block)>>,
}

impl MockBeaconView {
    pub fn new(active_shards: u16) -> Self {
        Self {
            active_shards,
            confirmations: RwLock::new(BTreeMap::new()),
        }
    }

    /// Record that beacon block `beacon_height` confirms `entry` of `from`.
    pub fn confirm(&self, beacon_height: u64, from: ShardId, entry: ShardStateEntry) -> CrossShardResult<()> {
        let mut body = BeaconBody::default();
        body.shard_states.insert(from, vec![entry.clone()]);
        let body = body.encode()?;
        let block = Block {
            header: BlockHeader {
                chain: ChainId::Beacon,
                version: 1,
                height: beacon_height,
                round: 1,
                epoch: 1,
                timestamp: 0,
                previous_hash: [0; 32],
                proposer: Fingerprint::from("beacon".to_string()),
                committee_root: [0; 32],
                body_root: keccak256(&body),
                cross_shard_root: [0; 32],
                beacon_height: 0,
            },
            body,
            validation: None,
        };
        self.confirmations.write().insert((from, entry.height), (entry, block));
        Ok(())
    }
}

#[async_trait]
impl BeaconView for MockBeaconView {
    async fn active_shards(&self) -> u16 {
        self.active_shards
    }

    async fn next_cross_shard_height(&self, from: ShardId, to: ShardId, start: u64) -> CrossShardResult<u64> {
        Ok(self
            .confirmations
            .read()
            .range((from, start)..=(from, u64::MAX))
            .find(|(_, (entry, _))| entry.cross_shard_to.contains(&to))
            .map_or(0, |((_, height), _)| *height))
    }

    async fn confirming_block(&self, from: ShardId, height: u64) -> CrossShardResult<Option<Block>> {
        Ok(self
            .confirmations
            .read()
            .get(&(from, height))
            .map(|(_, block)| block.clone()))
    }
}

/// Local shard view with settable progress.
pub struct MockShardView {
    shard_id: ShardId,
    last_requested: RwLock<HashMap<ShardId, u64>>,
}

impl MockShardView {
    pub fn new(shard_id: ShardId) -> Self {
        Self {
            shard_id,
            last_requested: RwLock::new(HashMap::new()),
        }
    }

    /// A local block consumed `from` payloads up to `height`.
    pub fn set_last_requested(&self, from: ShardId, height: u64) {
        self.last_requested.write().insert(from, height);
    }
}

#[async_trait]
impl ShardView for MockShardView {
    fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    async fn last_requested_height(&self, from: ShardId) -> u64 {
        self.last_requested.read().get(&from).copied().unwrap_or(0)
    }
}

/// Peers answering from a fixed set of payloads.
pub struct MockPeers {
    payloads: RwLock<HashMap<(ShardId, u64), CrossShardPayload>>,
    unsolicited: RwLock<Vec<CrossShardPayload>>,
    requests: RwLock<Vec<CrossShardRequest>>,
    reachable: AtomicBool,
}

impl MockPeers {
    pub fn new() -> Self {
        Self {
            payloads: RwLock::new(HashMap::new()),
            unsolicited: RwLock::new(Vec::new()),
            requests: RwLock::new(Vec::new()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Make `payload` available to requests for its source height.
    pub fn serve(&self, payload: CrossShardPayload) {
        if let Some(from) = payload.from_shard_id() {
            self.payloads
                .write()
                .insert((from, payload.source_block_height()), payload);
        }
    }

    /// Append `payload` to every response, whatever was asked for.
    pub fn push_unsolicited(&self, payload: CrossShardPayload) {
        self.unsolicited.write().push(payload);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<CrossShardRequest> {
        self.requests.read().clone()
    }
}

impl Default for MockPeers {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CrossShardPeers for MockPeers {
    async fn request_cross_shard(
        &self,
        request: CrossShardRequest,
    ) -> Result<mpsc::Receiver<CrossShardPayload>, NetworkError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(NetworkError::Unreachable("mock peers offline".to_string()));
        }
        let unsolicited = self.unsolicited.read().clone();
        let (tx, rx) = mpsc::channel(request.heights.len() + unsolicited.len() + 1);
        for payload in unsolicited {
            let _ = tx.try_send(payload);
        }
        {
            let payloads = self.payloads.read();
            for height in &request.heights {
                if let Some(payload) = payloads.get(&(request.shard_from, *height)) {
                    if payload.to_shard_id == request.shard_to {
                        let _ = tx.try_send(payload.clone());
                    }
                }
            }
        }
        self.requests.write().push(request);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(height: u64, to: Vec<ShardId>) -> ShardStateEntry {
        ShardStateEntry {
            height,
            hash: [height as u8; 32],
            cross_shard_to: to,
        }
    }

    #[tokio::test]
    async fn test_mock_beacon_next_height() {
        let beacon = MockBeaconView::new(4);
        beacon.confirm(40, 0, entry(8, vec![2])).unwrap();
        beacon.confirm(42, 0, entry(10, vec![1, 2])).unwrap();

        assert_eq!(beacon.next_cross_shard_height(0, 1, 1).await.unwrap(), 10);
        assert_eq!(beacon.next_cross_shard_height(0, 2, 1).await.unwrap(), 8);
        assert_eq!(beacon.next_cross_shard_height(0, 1, 11).await.unwrap(), 0);

        let block = beacon.confirming_block(0, 10).await.unwrap().unwrap();
        assert_eq!(block.height(), 42);
        assert!(block.body_matches_root());
        let body = BeaconBody::decode(&block.body).unwrap();
        assert!(body.shard_entry(0, 10).is_some());
    }

    #[tokio::test]
    async fn test_mock_peers_offline() {
        let peers = MockPeers::new();
        peers.set_reachable(false);
        let request = CrossShardRequest {
            shard_from: 0,
            shard_to: 1,
            heights: vec![1],
        };
        assert!(matches!(
            peers.request_cross_shard(request).await,
            Err(NetworkError::Unreachable(_))
        ));
        assert!(peers.requests().is_empty());
    }
}
