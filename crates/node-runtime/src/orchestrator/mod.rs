//! # Consensus Orchestrator
//!
//! Owns one BFT driver per chain the node validates.
//!
//! - Committee snapshots arrive on a `watch` channel. A chain whose
//!   committee changed gets its driver shut down and a fresh one spawned;
//!   untouched chains keep running.
//! - Inbound messages are routed to drivers by chain id. Messages for chains
//!   without a driver are dropped.
//! - The node role decides which chains are driven: `beacon` and `shard`
//!   always drive their chain, `auto` follows the local key's committee
//!   membership, `relay` drives nothing.

pub mod factory;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use sc_02_committee_state::CommitteeState;
use sc_04_bft::{DriverHandle, DriverInput, PushOutcome};
use shared_types::{ChainId, Fingerprint, InboundMessage, ShardId, ValidatorKey, WireMessage};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::container::{ConfigError, NodeRole, NodeSection};
use crate::metrics;

pub use factory::{BftDriverFactory, DriverFactory};

/// Chains the node drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainSelection {
    Beacon,
    Shard(ShardId),
    /// Every chain whose committee holds the local key.
    Auto,
    Relay,
}

impl ChainSelection {
    pub fn from_node(node: &NodeSection) -> Result<Self, ConfigError> {
        Ok(match node.role {
            NodeRole::Beacon => ChainSelection::Beacon,
            NodeRole::Shard => ChainSelection::Shard(node.shard_id.ok_or(ConfigError::MissingShardId)?),
            NodeRole::Auto => ChainSelection::Auto,
            NodeRole::Relay => ChainSelection::Relay,
        })
    }

    fn desired(&self, state: &CommitteeState, local: Option<&Fingerprint>) -> BTreeSet<ChainId> {
        match self {
            ChainSelection::Beacon => BTreeSet::from([ChainId::Beacon]),
            ChainSelection::Shard(sid) => BTreeSet::from([ChainId::Shard(*sid)]),
            ChainSelection::Relay => BTreeSet::new(),
            ChainSelection::Auto => {
                let Some(local) = local else {
                    return BTreeSet::new();
                };
                all_chains(state)
                    .filter(|chain| state.committee(*chain).iter().any(|key| key.fingerprint() == local))
                    .collect()
            }
        }
    }
}

fn all_chains(state: &CommitteeState) -> impl Iterator<Item = ChainId> {
    let shards = (0..state.active_shards()).filter_map(|sid| ShardId::try_from(sid).ok());
    std::iter::once(ChainId::Beacon).chain(shards.map(ChainId::Shard))
}

/// Where an inbound message went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered(PushOutcome),
    /// No driver runs for the message's chain.
    UnknownChain,
    /// The message kind is not consumed by drivers.
    Ignored,
}

struct RunningDriver {
    handle: DriverHandle,
    committee: Vec<ValidatorKey>,
}

pub struct ConsensusOrchestrator<F: DriverFactory> {
    selection: ChainSelection,
    local: Option<Fingerprint>,
    factory: F,
    drivers: HashMap<ChainId, RunningDriver>,
    committees: watch::Receiver<Arc<CommitteeState>>,
    inbound: mpsc::Receiver<InboundMessage>,
    shutdown: watch::Receiver<bool>,
}

impl<F: DriverFactory> ConsensusOrchestrator<F> {
    pub fn new(
        selection: ChainSelection,
        factory: F,
        committees: watch::Receiver<Arc<CommitteeState>>,
        inbound: mpsc::Receiver<InboundMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            selection,
            local: None,
            factory,
            drivers: HashMap::new(),
            committees,
            inbound,
            shutdown,
        }
    }

    /// Fingerprint of the local validator, used by `auto` selection.
    pub fn with_local_key(mut self, local: Option<Fingerprint>) -> Self {
        self.local = local;
        self
    }

    pub fn running_chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self.drivers.keys().copied().collect();
        chains.sort();
        chains
    }

    /// Bring the running drivers in line with `state`.
    pub async fn reconcile(&mut self, state: &CommitteeState) {
        let desired = self.selection.desired(state, self.local.as_ref());

        let undesired: Vec<ChainId> = self
            .drivers
            .keys()
            .filter(|chain| !desired.contains(chain))
            .copied()
            .collect();
        for chain in undesired {
            if let Some(running) = self.drivers.remove(&chain) {
                info!(%chain, "[orchestrator] Stopping driver, chain no longer validated");
                running.handle.shutdown().await;
                metrics::record_driver_transition(chain, "stop", self.drivers.len());
            }
        }

        for chain in desired {
            let committee = state.committee(chain).to_vec();
            match self.drivers.remove(&chain) {
                Some(running) if running.committee == committee && !running.handle.is_finished() => {
                    self.drivers.insert(chain, running);
                    continue;
                }
                Some(running) => {
                    if running.handle.is_finished() {
                        warn!(%chain, "[orchestrator] Driver exited, restarting");
                    } else {
                        info!(%chain, size = committee.len(), "[orchestrator] Committee changed, restarting driver");
                    }
                    running.handle.shutdown().await;
                    metrics::record_driver_transition(chain, "stop", self.drivers.len());
                }
                None => {}
            }
            self.start(chain, committee);
        }
    }

    fn start(&mut self, chain: ChainId, committee: Vec<ValidatorKey>) {
        match self.factory.spawn_driver(chain) {
            Ok(handle) => {
                info!(%chain, size = committee.len(), "[orchestrator] Driver started");
                self.drivers.insert(chain, RunningDriver { handle, committee });
                metrics::record_driver_transition(chain, "start", self.drivers.len());
            }
            Err(err) => {
                error!(%chain, "[orchestrator] Failed to start driver: {}", err);
                metrics::record_error("orchestrator", "driver_start");
            }
        }
    }

    /// Hand an inbound message to the driver of its chain.
    pub fn route(&mut self, msg: InboundMessage) -> RouteOutcome {
        let (chain, input) = match msg.message {
            WireMessage::Propose(propose) => (msg.chain, DriverInput::Propose(propose)),
            WireMessage::Vote(vote) => (msg.chain, DriverInput::Vote(vote)),
            WireMessage::BeaconBlock(_) => (ChainId::Beacon, DriverInput::ChainAdvanced),
            other => {
                debug!(chain = %msg.chain, kind = other.kind(), "[orchestrator] Message not for drivers");
                return RouteOutcome::Ignored;
            }
        };

        let Some(running) = self.drivers.get(&chain) else {
            debug!(%chain, kind = input.kind(), "[orchestrator] No driver for chain, dropped");
            metrics::record_inbound_dropped("unknown_chain");
            return RouteOutcome::UnknownChain;
        };
        let outcome = running.handle.send(input);
        match outcome {
            PushOutcome::Queued => {}
            PushOutcome::Evicted(kind) => debug!(%chain, evicted = kind, "[orchestrator] Driver inbox full"),
            PushOutcome::Dropped => {
                debug!(%chain, "[orchestrator] Driver inbox full, message dropped");
                metrics::record_inbound_dropped("inbox_full");
            }
            PushOutcome::Closed => warn!(%chain, "[orchestrator] Driver inbox closed"),
        }
        RouteOutcome::Delivered(outcome)
    }

    pub async fn stop_all(&mut self) {
        for (chain, running) in self.drivers.drain() {
            debug!(%chain, "[orchestrator] Stopping driver");
            running.handle.shutdown().await;
            metrics::record_driver_transition(chain, "stop", 0);
        }
    }

    /// Run until shutdown is signalled or every input closes.
    pub async fn run(mut self) {
        info!(selection = ?self.selection, "[orchestrator] Started");
        let initial = Arc::clone(&self.committees.borrow_and_update());
        self.reconcile(&initial).await;

        'run: loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break 'run,
                changed = self.committees.changed() => {
                    if changed.is_err() {
                        break 'run;
                    }
                    let state = Arc::clone(&self.committees.borrow_and_update());
                    self.reconcile(&state).await;
                }
                msg = self.inbound.recv() => match msg {
                    Some(msg) => {
                        if self.route(msg) == RouteOutcome::Delivered(PushOutcome::Closed) {
                            // A closed inbox means the driver task ended.
                            let state = Arc::clone(&self.committees.borrow());
                            self.reconcile(&state).await;
                        }
                    }
                    None => break 'run,
                },
            }
        }

        self.stop_all().await;
        info!("[orchestrator] Stopped");
    }
}
