//! # Node Container
//!
//! Builds every component of a devnet node from a [`NodeConfig`] and
//! starts their tasks.
//!
//! ## Wiring
//!
//! ```text
//!   LoopbackNetwork ──InboundMessage──→ ConsensusOrchestrator ──→ BftDriver (per chain)
//!                                              ↑                       │
//!                              CommitteeStateStore (watch)      InMemoryChain
//!                                              ↑                       │
//!   BeaconInstructionHandler ←──BlockFinalized── Event Bus ←───────────┘
//!
//!   shard InMemoryChain ──payloads──→ LoopbackPeers ──→ CrossShardSyncProcess ──→ CrossShardPool
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use sc_01_signature_aggregation::ValidatorSecrets;
use sc_02_committee_state::{CommitteeStateStore, InMemoryStateStore, StoreError};
use sc_03_cross_shard::{CrossShardPool, CrossShardSyncProcess, SyncHandle};
use sc_04_bft::{ConsensusError, ConsensusNetwork};
use shared_bus::{EventFilter, EventPublisher, EventTopic, InMemoryEventBus};
use shared_types::{ChainId, Fingerprint, InboundMessage, ShardId};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::config::{ConfigError, NodeConfig};
use crate::adapters::{ChainBeaconView, ChainTiming, InMemoryChain, LocalShardView, LoopbackNetwork, LoopbackPeers};
use crate::genesis::{Genesis, GenesisBuilder, GenesisError};
use crate::handlers::{BeaconInstructionHandler, HandlerError};
use crate::orchestrator::{BftDriverFactory, ChainSelection, ConsensusOrchestrator};

/// Startup failures.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Genesis error: {0}")]
    Genesis(#[from] GenesisError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Consensus setup error: {0}")]
    Consensus(#[from] ConsensusError),
}

/// Every component of a node, built but not yet running.
pub struct NodeContainer {
    pub config: NodeConfig,
    pub genesis: Genesis,
    pub bus: Arc<InMemoryEventBus>,
    pub blocks: Arc<InMemoryStateStore>,
    pub committees: Arc<CommitteeStateStore>,
    pub beacon: Arc<InMemoryChain>,
    pub shards: BTreeMap<ShardId, Arc<InMemoryChain>>,
    pub pools: BTreeMap<ShardId, Arc<CrossShardPool>>,
    pub peers: Arc<LoopbackPeers>,
    pub network: Arc<LoopbackNetwork>,
    selection: ChainSelection,
    secrets: Option<ValidatorSecrets>,
    local: Option<Fingerprint>,
    inbound: mpsc::Receiver<InboundMessage>,
}

impl NodeContainer {
    pub fn build(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let selection = ChainSelection::from_node(&config.node)?;
        let secrets = config.node.secrets()?;
        let local = match &secrets {
            Some(secrets) => Some(
                secrets
                    .validator_key()
                    .map_err(|e| ConfigError::InvalidSeed(e.to_string()))?
                    .fingerprint()
                    .clone(),
            ),
            None => None,
        };

        let genesis = GenesisBuilder::new(config.genesis.clone()).build()?;
        let blocks = Arc::new(InMemoryStateStore::new());
        let committees = Arc::new(CommitteeStateStore::bootstrap(blocks.as_ref(), genesis.state.clone())?);
        let bus = Arc::new(InMemoryEventBus::new());

        let (inbound_tx, inbound) = mpsc::channel(config.consensus.inbox_capacity);
        let network = Arc::new(LoopbackNetwork::new(inbound_tx));
        let peers = Arc::new(LoopbackPeers::new());
        let timing = ChainTiming::from(&config.consensus);

        let beacon = Arc::new(
            InMemoryChain::new(
                ChainId::Beacon,
                Arc::clone(&committees),
                config.committee.clone(),
                timing,
                blocks.clone(),
                genesis.timestamp_ms,
            )
            .with_network(network.clone() as Arc<dyn ConsensusNetwork>),
        );

        let mut shards = BTreeMap::new();
        let mut pools = BTreeMap::new();
        for sid in (0..config.committee.active_shards).filter_map(|sid| ShardId::try_from(sid).ok()) {
            let pool = Arc::new(CrossShardPool::new(config.cross_shard.pool.clone()));
            let chain = InMemoryChain::new(
                ChainId::Shard(sid),
                Arc::clone(&committees),
                config.committee.clone(),
                timing,
                blocks.clone(),
                genesis.timestamp_ms,
            )
            .with_beacon(Arc::clone(&beacon))
            .with_peers(Arc::clone(&peers))
            .with_pool(Arc::clone(&pool));
            shards.insert(sid, Arc::new(chain));
            pools.insert(sid, pool);
        }

        info!(
            role = %config.node.role,
            shards = shards.len(),
            validators = genesis.validators.len(),
            local = local.as_ref().map(|fp| fp.short().to_string()),
            "Node container built"
        );

        Ok(Self {
            config,
            genesis,
            bus,
            blocks,
            committees,
            beacon,
            shards,
            pools,
            peers,
            network,
            selection,
            secrets,
            local,
            inbound,
        })
    }

    /// Shards whose incoming payloads this node syncs.
    fn synced_shards(&self) -> Vec<ShardId> {
        match self.selection {
            ChainSelection::Shard(sid) => vec![sid],
            ChainSelection::Auto => self.shards.keys().copied().collect(),
            ChainSelection::Beacon | ChainSelection::Relay => Vec::new(),
        }
    }

    /// Spawn the orchestrator, the instruction handler and the cross-shard
    /// sync loops.
    pub fn start(self) -> RunningNode {
        let synced = self.synced_shards();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let bus: Arc<dyn EventPublisher> = self.bus.clone();

        let mut factory = BftDriverFactory::new(self.config.consensus.clone(), Arc::clone(&self.network))
            .with_identity(self.secrets.clone())
            .with_event_bus(Arc::clone(&bus))
            .with_chain(ChainId::Beacon, Arc::clone(&self.beacon));
        for (sid, chain) in &self.shards {
            factory = factory.with_chain(ChainId::Shard(*sid), Arc::clone(chain));
        }
        let orchestrator = ConsensusOrchestrator::new(
            self.selection,
            factory,
            self.committees.subscribe(),
            self.inbound,
            shutdown_rx.clone(),
        )
        .with_local_key(self.local.clone());
        let mut tasks = vec![("orchestrator", tokio::spawn(orchestrator.run()))];

        let events = self
            .bus
            .subscribe(EventFilter::topics(vec![EventTopic::Consensus]).for_chain(ChainId::Beacon));
        let handler = BeaconInstructionHandler::new(
            events,
            Arc::clone(&self.committees),
            self.config.committee.clone(),
            Arc::clone(&bus),
        )
        .with_snapshot_store(self.blocks.clone());
        let handler = tokio::spawn(handler.run(shutdown_rx));

        let beacon_view = Arc::new(ChainBeaconView::new(
            Arc::clone(&self.beacon),
            self.config.committee.active_shards,
        ));
        let mut syncs = Vec::new();
        for sid in synced {
            let (Some(chain), Some(pool)) = (self.shards.get(&sid), self.pools.get(&sid)) else {
                continue;
            };
            let (handle, join) = CrossShardSyncProcess::new(
                self.config.cross_shard.sync.clone(),
                Arc::clone(&beacon_view),
                Arc::new(LocalShardView::new(sid, Arc::clone(chain))),
                Arc::clone(&self.peers),
                Arc::clone(pool),
            )
            .with_event_bus(Arc::clone(&bus))
            .spawn();
            syncs.push(handle);
            tasks.push(("cross-shard-sync", join));
        }

        info!(syncs = syncs.len(), "Node started");
        RunningNode {
            shutdown,
            tasks,
            handler: Some(handler),
            syncs,
        }
    }
}

/// Tasks of a started node.
pub struct RunningNode {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    handler: Option<JoinHandle<Result<(), HandlerError>>>,
    syncs: Vec<SyncHandle>,
}

impl RunningNode {
    pub fn sync_handles(&self) -> &[SyncHandle] {
        &self.syncs
    }

    /// Resolves when the instruction handler stops on a fatal error.
    /// Pending forever otherwise.
    pub async fn fatal(&mut self) -> HandlerError {
        if let Some(handler) = self.handler.as_mut() {
            let result = handler.await;
            self.handler = None;
            match result {
                Ok(Err(err)) => return err,
                Ok(Ok(())) => info!("Instruction handler exited"),
                Err(err) => warn!("Instruction handler task failed: {}", err),
            }
        }
        std::future::pending().await
    }

    /// Signal shutdown and wait for every task.
    pub async fn shutdown(self) {
        info!("Initiating graceful shutdown...");
        let _ = self.shutdown.send(true);
        for sync in &self.syncs {
            sync.stop().await;
        }
        for (name, task) in self.tasks {
            if let Err(err) = task.await {
                warn!(task = name, "Task ended abnormally: {}", err);
            }
        }
        if let Some(handler) = self.handler {
            match handler.await {
                Ok(Err(err)) => warn!("Instruction handler failed: {}", err),
                Err(err) => warn!("Instruction handler task failed: {}", err),
                Ok(Ok(())) => {}
            }
        }
        info!("Shutdown complete");
    }
}
