//! # Cross-Shard Adapters
//!
//! Beacon and shard views over [`InMemoryChain`]s, and a loopback peer set
//! that serves the payloads local shard chains mint.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sc_03_cross_shard::{BeaconView, CrossShardPeers, CrossShardResult, ShardView};
use shared_types::{BeaconBody, Block, CrossShardPayload, CrossShardRequest, NetworkError, ShardId, ShardStateEntry};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::chain::InMemoryChain;

#[derive(Default)]
struct ConfirmationIndex {
    /// Beacon height scanned so far.
    scanned: u64,
    /// `(shard, shard height)` to the confirmation and its beacon height.
    entries: BTreeMap<(ShardId, u64), (ShardStateEntry, u64)>,
}

/// [`BeaconView`] over the local beacon chain. Confirmations are indexed
/// incrementally as the chain grows.
pub struct ChainBeaconView {
    beacon: Arc<InMemoryChain>,
    active_shards: u16,
    index: Mutex<ConfirmationIndex>,
}

impl ChainBeaconView {
    pub fn new(beacon: Arc<InMemoryChain>, active_shards: u16) -> Self {
        Self {
            beacon,
            active_shards,
            index: Mutex::new(ConfirmationIndex::default()),
        }
    }

    fn catch_up(&self) -> CrossShardResult<()> {
        let tip = self.beacon.tip_height();
        let mut index = self.index.lock();
        while index.scanned < tip {
            let height = index.scanned + 1;
            let Some(block) = self.beacon.block_at(height) else {
                warn!(height, "[xshard] Beacon block missing from store");
                break;
            };
            let body = BeaconBody::decode(&block.body)?;
            for (shard, entries) in body.shard_states {
                for entry in entries {
                    index.entries.insert((shard, entry.height), (entry, height));
                }
            }
            index.scanned = height;
        }
        Ok(())
    }
}

#[async_trait]
impl BeaconView for ChainBeaconView {
    async fn active_shards(&self) -> u16 {
        self.active_shards
    }

    async fn next_cross_shard_height(&self, from: ShardId, to: ShardId, start: u64) -> CrossShardResult<u64> {
        self.catch_up()?;
        Ok(self
            .index
            .lock()
            .entries
            .range((from, start)..=(from, u64::MAX))
            .find(|(_, (entry, _))| entry.cross_shard_to.contains(&to))
            .map_or(0, |((_, height), _)| *height))
    }

    async fn confirming_block(&self, from: ShardId, height: u64) -> CrossShardResult<Option<Block>> {
        self.catch_up()?;
        let beacon_height = self
            .index
            .lock()
            .entries
            .get(&(from, height))
            .map(|(_, beacon_height)| *beacon_height);
        Ok(beacon_height.and_then(|h| self.beacon.block_at(h)))
    }
}

/// [`ShardView`] over a local shard chain.
pub struct LocalShardView {
    shard_id: ShardId,
    chain: Arc<InMemoryChain>,
}

impl LocalShardView {
    pub fn new(shard_id: ShardId, chain: Arc<InMemoryChain>) -> Self {
        Self { shard_id, chain }
    }
}

#[async_trait]
impl ShardView for LocalShardView {
    fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    async fn last_requested_height(&self, from: ShardId) -> u64 {
        self.chain.last_consumed(from)
    }
}

/// In-process peer set. Shard chains publish the payloads they mint;
/// requests are answered from what was published.
pub struct LoopbackPeers {
    payloads: RwLock<HashMap<(ShardId, ShardId, u64), CrossShardPayload>>,
    reachable: AtomicBool,
}

impl LoopbackPeers {
    pub fn new() -> Self {
        Self {
            payloads: RwLock::new(HashMap::new()),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn publish(&self, payload: CrossShardPayload) {
        let Some(from) = payload.from_shard_id() else {
            return;
        };
        let height = payload.source_block_height();
        debug!(from, to = payload.to_shard_id, height, "[xshard] Payload published");
        self.payloads
            .write()
            .insert((from, payload.to_shard_id, height), payload);
    }

    pub fn payload(&self, from: ShardId, to: ShardId, height: u64) -> Option<CrossShardPayload> {
        self.payloads.read().get(&(from, to, height)).cloned()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

impl Default for LoopbackPeers {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CrossShardPeers for LoopbackPeers {
    async fn request_cross_shard(
        &self,
        request: CrossShardRequest,
    ) -> Result<mpsc::Receiver<CrossShardPayload>, NetworkError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(NetworkError::Unreachable("loopback peers offline".into()));
        }
        let (tx, rx) = mpsc::channel(request.heights.len().max(1));
        let payloads = self.payloads.read();
        for height in &request.heights {
            if let Some(payload) = payloads.get(&(request.shard_from, request.shard_to, *height)) {
                let _ = tx.try_send(payload.clone());
            }
        }
        Ok(rx)
    }
}
