//! # In-Memory Chain Adapter
//!
//! [`ChainCollaborator`] for one chain of a devnet node. Blocks go to a
//! [`StateStore`]; committees are read from the live committee snapshot.
//!
//! - Beacon blocks carry queued instructions and shard confirmations in a
//!   [`BeaconBody`].
//! - Shard blocks carry queued cross-shard outputs and the payloads they
//!   consume in a [`ShardBody`]. Inserting one publishes its payloads to
//!   peers and queues its confirmation on the beacon chain.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sc_01_signature_aggregation::{AggregateSig, AggregationError, MultiSignature, SignatureAggregator};
use sc_02_committee_state::{CommitteeParams, CommitteeStateStore, RawInstruction, StateStore};
use sc_03_cross_shard::CrossShardPool;
use sc_04_bft::{BftConfig, BlockRequest, ChainCollaborator, ChainError, ChainView, ConsensusNetwork};
use serde::{Deserialize, Serialize};
use shared_types::{
    committee_hash, hex_short, keccak256, BeaconBody, Block, BlockHeader, ChainId, Coin, CodecError,
    CrossShardOutputs, Hash, ShardId, ShardStateEntry, ValidatorKey, WireMessage,
};
use tracing::{debug, info, warn};

use super::cross_shard::LoopbackPeers;

/// Decoded body of a shard block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardBody {
    /// Cross-shard outputs minted by this block, by ascending destination.
    pub outputs: Vec<(ShardId, Vec<Coin>)>,
    /// Payloads consumed: `(source shard, source height, source hash)`.
    pub consumed: Vec<(ShardId, u64, Hash)>,
}

impl ShardBody {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn output_count(&self) -> usize {
        self.outputs.iter().map(|(_, coins)| coins.len()).sum()
    }
}

/// Block timing shared with the chain's driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTiming {
    pub min_block_interval: Duration,
    pub max_block_create_time: Duration,
}

impl From<&BftConfig> for ChainTiming {
    fn from(config: &BftConfig) -> Self {
        Self {
            min_block_interval: config.min_block_interval,
            max_block_create_time: config.max_block_create_time,
        }
    }
}

#[derive(Debug, Clone)]
struct Tip {
    height: u64,
    hash: Hash,
    timestamp: i64,
    proposer_index: usize,
}

#[derive(Debug, Default)]
struct PendingContent {
    instructions: Vec<RawInstruction>,
    confirmations: BTreeMap<ShardId, Vec<ShardStateEntry>>,
    outputs: Vec<(ShardId, Coin)>,
}

pub struct InMemoryChain {
    chain: ChainId,
    committees: Arc<CommitteeStateStore>,
    params: CommitteeParams,
    timing: ChainTiming,
    blocks: Arc<dyn StateStore>,
    aggregator: SignatureAggregator,
    tip: RwLock<Tip>,
    pending: Mutex<PendingContent>,
    /// Highest consumed source height per source shard.
    consumed: RwLock<BTreeMap<ShardId, u64>>,
    beacon: Option<Arc<InMemoryChain>>,
    network: Option<Arc<dyn ConsensusNetwork>>,
    peers: Option<Arc<LoopbackPeers>>,
    pool: Option<Arc<CrossShardPool>>,
}

impl InMemoryChain {
    pub fn new(
        chain: ChainId,
        committees: Arc<CommitteeStateStore>,
        params: CommitteeParams,
        timing: ChainTiming,
        blocks: Arc<dyn StateStore>,
        genesis_timestamp: i64,
    ) -> Self {
        Self {
            chain,
            committees,
            params,
            timing,
            blocks,
            aggregator: SignatureAggregator::new(),
            tip: RwLock::new(Tip {
                height: 0,
                hash: genesis_hash(chain),
                timestamp: genesis_timestamp,
                proposer_index: 0,
            }),
            pending: Mutex::new(PendingContent::default()),
            consumed: RwLock::new(BTreeMap::new()),
            beacon: None,
            network: None,
            peers: None,
            pool: None,
        }
    }

    /// Shard blocks are confirmed on this beacon chain.
    pub fn with_beacon(mut self, beacon: Arc<InMemoryChain>) -> Self {
        self.beacon = Some(beacon);
        self
    }

    /// Finalised beacon blocks are broadcast here.
    pub fn with_network(mut self, network: Arc<dyn ConsensusNetwork>) -> Self {
        self.network = Some(network);
        self
    }

    /// Minted cross-shard payloads are served from here.
    pub fn with_peers(mut self, peers: Arc<LoopbackPeers>) -> Self {
        self.peers = Some(peers);
        self
    }

    /// Validated incoming payloads are consumed from here.
    pub fn with_pool(mut self, pool: Arc<CrossShardPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    pub fn tip_height(&self) -> u64 {
        self.tip.read().height
    }

    pub fn tip_hash(&self) -> Hash {
        self.tip.read().hash
    }

    pub fn block_at(&self, height: u64) -> Option<Block> {
        match self.blocks.block_by_height(self.chain, height) {
            Ok(block) => block,
            Err(err) => {
                warn!(chain = %self.chain, height, "Block lookup failed: {}", err);
                None
            }
        }
    }

    /// Queue an instruction for the next beacon block.
    pub fn submit_instruction(&self, instruction: RawInstruction) -> Result<(), ChainError> {
        if !self.chain.is_beacon() {
            return Err(ChainError::Invalid("instructions go to the beacon chain".into()));
        }
        self.pending.lock().instructions.push(instruction);
        Ok(())
    }

    /// Queue the confirmation of a shard block for the next beacon block.
    pub fn confirm_shard_block(&self, shard: ShardId, entry: ShardStateEntry) {
        self.pending
            .lock()
            .confirmations
            .entry(shard)
            .or_default()
            .push(entry);
    }

    /// Queue a cross-shard output for the next block of this shard.
    pub fn queue_output(&self, to_shard: ShardId, coin: Coin) -> Result<(), ChainError> {
        if self.chain.shard_id().is_none() || u16::from(to_shard) >= self.active_shards() {
            return Err(ChainError::Invalid(format!("cannot send outputs to shard {to_shard}")));
        }
        self.pending.lock().outputs.push((to_shard, coin));
        Ok(())
    }

    /// Highest source height of `from` consumed by this shard.
    pub fn last_consumed(&self, from: ShardId) -> u64 {
        self.consumed.read().get(&from).copied().unwrap_or(0)
    }

    fn active_shards(&self) -> u16 {
        self.committees.current().active_shards()
    }

    fn signing_committee(&self) -> Vec<ValidatorKey> {
        self.committees.current().committee(self.chain).to_vec()
    }

    // =========================================================================
    // BODIES
    // =========================================================================

    fn beacon_body(&self) -> BeaconBody {
        let pending = self.pending.lock();
        BeaconBody {
            instructions: pending.instructions.clone(),
            shard_states: pending.confirmations.clone(),
        }
    }

    fn shard_body(&self, local: ShardId) -> ShardBody {
        let mut outputs: BTreeMap<ShardId, Vec<Coin>> = BTreeMap::new();
        for (to, coin) in &self.pending.lock().outputs {
            outputs.entry(*to).or_default().push(coin.clone());
        }

        let mut consumed = Vec::new();
        if let Some(pool) = &self.pool {
            for from in (0..self.active_shards()).filter_map(|sid| ShardId::try_from(sid).ok()) {
                if from == local {
                    continue;
                }
                let mut next = self.last_consumed(from) + 1;
                for payload in pool.take(from, next, u64::MAX) {
                    // Strictly ascending, one payload per source height.
                    if payload.source_block_height() < next {
                        continue;
                    }
                    next = payload.source_block_height() + 1;
                    consumed.push((from, payload.source_block_height(), payload.source_block_hash()));
                }
            }
        }

        ShardBody {
            outputs: outputs.into_iter().collect(),
            consumed,
        }
    }

    fn outputs_tree(&self, body: &ShardBody) -> CrossShardOutputs {
        let mut tree = CrossShardOutputs::new(usize::from(self.active_shards()));
        for (to, coins) in &body.outputs {
            if let Some(slot) = tree.by_destination.get_mut(usize::from(*to)) {
                slot.0.extend(coins.iter().cloned());
            }
        }
        tree
    }

    // =========================================================================
    // AFTER INSERT
    // =========================================================================

    async fn after_beacon_block(&self, block: &Block) {
        match BeaconBody::decode(&block.body) {
            Ok(body) => {
                let mut pending = self.pending.lock();
                if pending.instructions.starts_with(&body.instructions) {
                    pending.instructions.drain(..body.instructions.len());
                }
                for (shard, entries) in &body.shard_states {
                    if let Some(queued) = pending.confirmations.get_mut(shard) {
                        queued.retain(|entry| !entries.contains(entry));
                    }
                }
                pending.confirmations.retain(|_, queued| !queued.is_empty());
            }
            Err(err) => warn!(height = block.height(), "Undecodable beacon body: {}", err),
        }

        if let Some(network) = &self.network {
            if let Err(err) = network.broadcast(WireMessage::BeaconBlock(block.clone())).await {
                debug!(height = block.height(), "Beacon block broadcast failed: {}", err);
            }
        }
    }

    fn after_shard_block(&self, local: ShardId, block: &Block) {
        let body = match ShardBody::decode(&block.body) {
            Ok(body) => body,
            Err(err) => {
                warn!(chain = %self.chain, height = block.height(), "Undecodable shard body: {}", err);
                return;
            }
        };

        {
            let mut pending = self.pending.lock();
            let minted = body.output_count().min(pending.outputs.len());
            pending.outputs.drain(..minted);
        }

        for (from, height, hash) in &body.consumed {
            self.consumed.write().insert(*from, *height);
            if let Some(pool) = &self.pool {
                pool.prune(*from, height + 1);
            }
            debug!(chain = %self.chain, from, height, hash = %hex_short(hash), "Cross-shard payload consumed");
        }

        let tree = self.outputs_tree(&body);
        let destinations = tree.destinations();
        if let (Some(peers), Some(validation)) = (&self.peers, &block.validation) {
            match validation.encode() {
                Ok(encoded) => {
                    for to in &destinations {
                        if let Some(payload) = tree.payload_for(&block.header, encoded.clone(), *to) {
                            peers.publish(payload);
                        }
                    }
                }
                Err(err) => warn!(chain = %self.chain, "Validation data encoding failed: {}", err),
            }
        }

        if let Some(beacon) = &self.beacon {
            beacon.confirm_shard_block(
                local,
                ShardStateEntry {
                    height: block.height(),
                    hash: block.hash(),
                    cross_shard_to: destinations,
                },
            );
        }
    }
}

#[async_trait]
impl ChainCollaborator for InMemoryChain {
    async fn view(&self) -> ChainView {
        let committee = self.signing_committee();
        let tip = self.tip.read().clone();
        ChainView {
            chain: self.chain,
            current_height: tip.height,
            last_block_hash: tip.hash,
            last_block_timestamp: tip.timestamp,
            min_block_interval: self.timing.min_block_interval,
            max_block_create_time: self.timing.max_block_create_time,
            committee,
            pending_committee: Vec::new(),
            last_proposer_index: tip.proposer_index,
        }
    }

    async fn create_block(&self, request: BlockRequest) -> Result<Block, ChainError> {
        let tip = self.tip.read().clone();
        if request.previous_hash != tip.hash {
            return Err(ChainError::NotReady);
        }
        let height = tip.height + 1;

        let (body, cross_shard_root, beacon_height, epoch) = match self.chain {
            ChainId::Beacon => {
                let body = self
                    .beacon_body()
                    .encode()
                    .map_err(|e| ChainError::Internal(e.to_string()))?;
                (body, [0; 32], 0, self.params.epoch_of(height))
            }
            ChainId::Shard(local) => {
                let shard_body = self.shard_body(local);
                let root = self.outputs_tree(&shard_body).root();
                let body = shard_body
                    .encode()
                    .map_err(|e| ChainError::Internal(e.to_string()))?;
                let beacon_height = self.beacon.as_ref().map_or(0, |beacon| beacon.tip_height());
                (body, root, beacon_height, self.committees.current().epoch())
            }
        };

        Ok(Block {
            header: BlockHeader {
                chain: self.chain,
                version: request.version,
                height,
                round: request.round,
                epoch,
                timestamp: request.start_time,
                previous_hash: request.previous_hash,
                proposer: request.proposer,
                committee_root: committee_hash(&request.committee),
                body_root: keccak256(&body),
                cross_shard_root,
                beacon_height,
            },
            body,
            validation: None,
        })
    }

    async fn validate_pre_sign_block(&self, block: &Block, committee: &[ValidatorKey]) -> Result<(), ChainError> {
        if block.chain() != self.chain {
            return Err(ChainError::Invalid(format!("block belongs to {}", block.chain())));
        }
        {
            let tip = self.tip.read();
            if block.height() != tip.height + 1 || block.header.previous_hash != tip.hash {
                return Err(ChainError::Stale);
            }
        }
        if !block.body_matches_root() {
            return Err(ChainError::Invalid("body root mismatch".into()));
        }
        if block.header.committee_root != committee_hash(committee) {
            return Err(ChainError::Invalid("committee root mismatch".into()));
        }
        match self.chain {
            ChainId::Beacon => {
                BeaconBody::decode(&block.body).map_err(|e| ChainError::Invalid(e.to_string()))?;
            }
            ChainId::Shard(_) => {
                let body = ShardBody::decode(&block.body).map_err(|e| ChainError::Invalid(e.to_string()))?;
                if self.outputs_tree(&body).root() != block.header.cross_shard_root {
                    return Err(ChainError::Invalid("cross-shard root mismatch".into()));
                }
            }
        }
        Ok(())
    }

    async fn validate_block_signatures(&self, block: &Block, committee: &[ValidatorKey]) -> Result<(), ChainError> {
        let data = block.validation.as_ref().ok_or(ChainError::BadAggregate)?;
        let aggregate = AggregateSig::from_validation_data(data).map_err(|_| ChainError::BadAggregate)?;
        self.aggregator
            .verify_aggregate(&block.hash(), committee, &aggregate)
            .map_err(|e| match e {
                AggregationError::InsufficientQuorum { .. } => ChainError::InsufficientQuorum,
                _ => ChainError::BadAggregate,
            })
    }

    async fn insert_and_broadcast(&self, block: Block) -> Result<(), ChainError> {
        if block.chain() != self.chain {
            return Err(ChainError::Invalid(format!("block belongs to {}", block.chain())));
        }
        {
            let tip = self.tip.read();
            if block.height() != tip.height + 1 || block.header.previous_hash != tip.hash {
                return Err(ChainError::Stale);
            }
        }
        let signing = self.signing_committee();
        self.validate_block_signatures(&block, &signing).await?;
        self.blocks
            .put_block(block.clone())
            .map_err(|e| ChainError::Internal(e.to_string()))?;

        {
            let mut tip = self.tip.write();
            if block.height() != tip.height + 1 {
                return Err(ChainError::Stale);
            }
            let proposer_index = signing
                .iter()
                .position(|key| *key.fingerprint() == block.header.proposer)
                .unwrap_or(tip.proposer_index);
            *tip = Tip {
                height: block.height(),
                hash: block.hash(),
                timestamp: block.header.timestamp,
                proposer_index,
            };
        }
        info!(
            chain = %self.chain,
            height = block.height(),
            hash = %hex_short(&block.hash()),
            "Block appended"
        );

        match self.chain {
            ChainId::Beacon => self.after_beacon_block(&block).await,
            ChainId::Shard(local) => self.after_shard_block(local, &block),
        }
        Ok(())
    }
}

fn genesis_hash(chain: ChainId) -> Hash {
    keccak256(format!("shardline-genesis:{chain}").as_bytes())
}
