//! # Outbound Ports (Driven Ports)
//!
//! What a driver needs from its chain, the network and the clock.
//!
//! Production: the node's chain adapters and the P2P layer.
//! Testing: `MockChain`, `MockNetwork`, `ManualClock` (below).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use sc_01_signature_aggregation::{AggregateSig, AggregationError, MultiSignature, SignatureAggregator};
use shared_types::{
    committee_hash, keccak256, Block, BlockHeader, ChainId, NetworkError, ValidatorKey, WireMessage,
};

use crate::domain::errors::ChainError;
use crate::domain::view::{BlockRequest, ChainView};

/// One chain (beacon or a shard) as seen by its driver.
#[async_trait]
pub trait ChainCollaborator: Send + Sync {
    /// Snapshot of the tip, timing parameters and committees.
    async fn view(&self) -> ChainView;

    async fn create_block(&self, request: BlockRequest) -> Result<Block, ChainError>;

    /// Checks a proposal before we sign it.
    async fn validate_pre_sign_block(&self, block: &Block, committee: &[ValidatorKey]) -> Result<(), ChainError>;

    async fn validate_block_signatures(&self, block: &Block, committee: &[ValidatorKey]) -> Result<(), ChainError>;

    /// Append a finalised block and hand it to peers.
    async fn insert_and_broadcast(&self, block: Block) -> Result<(), ChainError>;
}

#[async_trait]
pub trait ConsensusNetwork: Send + Sync {
    /// Send to the peers validating `chain`.
    async fn send_to_chain(&self, chain: ChainId, message: WireMessage) -> Result<(), NetworkError>;

    async fn broadcast(&self, message: WireMessage) -> Result<(), NetworkError>;
}

/// Wall clock in unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        i64::try_from(millis).unwrap_or(i64::MAX)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// =============================================================================
// MOCKS
// =============================================================================

struct MockChainState {
    view: ChainView,
    inserted: Vec<Block>,
    reject_pre_sign: bool,
    create_error: Option<ChainError>,
}

/// In-memory chain that builds trivial blocks and checks aggregates for
/// real.
pub struct MockChain {
    chain: ChainId,
    aggregator: SignatureAggregator,
    state: RwLock<MockChainState>,
}

impl MockChain {
    pub fn new(
        chain: ChainId,
        committee: Vec<ValidatorKey>,
        min_block_interval: Duration,
        tip_height: u64,
        tip_timestamp: i64,
    ) -> Self {
        Self {
            chain,
            aggregator: SignatureAggregator::new(),
            state: RwLock::new(MockChainState {
                view: ChainView {
                    chain,
                    current_height: tip_height,
                    last_block_hash: keccak256(&tip_height.to_be_bytes()),
                    last_block_timestamp: tip_timestamp,
                    min_block_interval,
                    max_block_create_time: Duration::from_millis(500),
                    committee,
                    pending_committee: Vec::new(),
                    last_proposer_index: 0,
                },
                inserted: Vec::new(),
                reject_pre_sign: false,
                create_error: None,
            }),
        }
    }

    /// A block arrived from a peer.
    pub fn advance(&self, height: u64, timestamp: i64, proposer_index: usize) {
        let mut state = self.state.write();
        state.view.current_height = height;
        state.view.last_block_hash = keccak256(&height.to_be_bytes());
        state.view.last_block_timestamp = timestamp;
        state.view.last_proposer_index = proposer_index;
    }

    pub fn set_committee(&self, committee: Vec<ValidatorKey>) {
        self.state.write().view.committee = committee;
    }

    pub fn set_reject_pre_sign(&self, reject: bool) {
        self.state.write().reject_pre_sign = reject;
    }

    pub fn set_create_error(&self, error: Option<ChainError>) {
        self.state.write().create_error = error;
    }

    pub fn inserted(&self) -> Vec<Block> {
        self.state.read().inserted.clone()
    }

    pub fn current_height(&self) -> u64 {
        self.state.read().view.current_height
    }
}

#[async_trait]
impl ChainCollaborator for MockChain {
    async fn view(&self) -> ChainView {
        self.state.read().view.clone()
    }

    async fn create_block(&self, request: BlockRequest) -> Result<Block, ChainError> {
        let state = self.state.read();
        if let Some(error) = &state.create_error {
            return Err(error.clone());
        }
        let height = state.view.next_height();
        let body = format!("{}:{}:{}", self.chain, height, request.round).into_bytes();
        Ok(Block {
            header: BlockHeader {
                chain: self.chain,
                version: request.version,
                height,
                round: request.round,
                epoch: 1,
                timestamp: request.start_time,
                previous_hash: request.previous_hash,
                proposer: request.proposer,
                committee_root: committee_hash(&request.committee),
                body_root: keccak256(&body),
                cross_shard_root: [0; 32],
                beacon_height: 0,
            },
            body,
            validation: None,
        })
    }

    async fn validate_pre_sign_block(&self, block: &Block, committee: &[ValidatorKey]) -> Result<(), ChainError> {
        let state = self.state.read();
        if state.reject_pre_sign {
            return Err(ChainError::Invalid("rejected by mock chain".into()));
        }
        if block.height() != state.view.next_height() {
            return Err(ChainError::Stale);
        }
        if !block.body_matches_root() {
            return Err(ChainError::Invalid("body root mismatch".into()));
        }
        if block.header.committee_root != committee_hash(committee) {
            return Err(ChainError::Invalid("committee root mismatch".into()));
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
        let signing = {
            let state = self.state.read();
            if block.height() != state.view.next_height() {
                return Err(ChainError::Stale);
            }
            state.view.signing_committee().to_vec()
        };
        self.validate_block_signatures(&block, &signing).await?;

        let mut state = self.state.write();
        if block.height() != state.view.next_height() {
            return Err(ChainError::Stale);
        }
        let proposer_index = state
            .view
            .committee
            .iter()
            .position(|key| *key.fingerprint() == block.header.proposer)
            .unwrap_or(state.view.last_proposer_index);
        state.view.current_height = block.height();
        state.view.last_block_hash = block.hash();
        state.view.last_block_timestamp = block.header.timestamp;
        state.view.last_proposer_index = proposer_index;
        state.inserted.push(block);
        Ok(())
    }
}

/// Records everything sent; optionally offline.
#[derive(Default)]
pub struct MockNetwork {
    sent: RwLock<Vec<(Option<ChainId>, WireMessage)>>,
    offline: AtomicBool,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(Option<ChainId>, WireMessage)> {
        self.sent.read().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.sent
            .read()
            .iter()
            .filter(|(_, message)| message.kind() == kind)
            .count()
    }

    fn record(&self, chain: Option<ChainId>, message: WireMessage) -> Result<(), NetworkError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Unreachable("mock network offline".into()));
        }
        self.sent.write().push((chain, message));
        Ok(())
    }
}

#[async_trait]
impl ConsensusNetwork for MockNetwork {
    async fn send_to_chain(&self, chain: ChainId, message: WireMessage) -> Result<(), NetworkError> {
        self.record(Some(chain), message)
    }

    async fn broadcast(&self, message: WireMessage) -> Result<(), NetworkError> {
        self.record(None, message)
    }
}
