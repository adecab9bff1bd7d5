//! # Beacon Instruction Handler
//!
//! Folds the instructions of every finalised beacon block into the
//! committee state.
//!
//! ## Flow
//!
//! 1. Beacon driver finalises a block → `BlockFinalized` on the bus
//! 2. Handler decodes `BeaconBody.instructions` and parses each one
//! 3. `CommitteeStateStore::commit` publishes the new snapshot
//! 4. Handler publishes `CommitteeStateCommitted`
//!
//! An invariant violation stops the handler and is reported as a
//! `CriticalError`.

use std::sync::Arc;

use sc_02_committee_state::{
    CommitteeChange, CommitteeError, CommitteeParams, CommitteeStateStore, Instruction, ProcessEnv, StateStore,
};
use shared_bus::{EventPublisher, NodeEvent, Subscription};
use shared_types::{BeaconBody, Block, ChainId};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::metrics;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Committee state rejected beacon block {height}: {source}")]
    Fatal {
        height: u64,
        #[source]
        source: CommitteeError,
    },
}

pub struct BeaconInstructionHandler {
    events: Subscription,
    committees: Arc<CommitteeStateStore>,
    params: CommitteeParams,
    bus: Arc<dyn EventPublisher>,
    snapshots: Option<Arc<dyn StateStore>>,
}

impl BeaconInstructionHandler {
    /// `events` should carry the beacon chain's `BlockFinalized` events.
    pub fn new(
        events: Subscription,
        committees: Arc<CommitteeStateStore>,
        params: CommitteeParams,
        bus: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            events,
            committees,
            params,
            bus,
            snapshots: None,
        }
    }

    /// Persist every committed snapshot here.
    pub fn with_snapshot_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    /// Apply one finalised beacon block. Returns the change when a new
    /// snapshot was committed.
    pub async fn handle_block(&self, block: &Block) -> Result<Option<CommitteeChange>, HandlerError> {
        let height = block.height();
        if block.chain() != ChainId::Beacon || height <= self.committees.current().height() {
            return Ok(None);
        }

        let body = match BeaconBody::decode(&block.body) {
            Ok(body) => body,
            Err(err) => {
                warn!(height, "[committee] Undecodable beacon body: {}", err);
                return Ok(None);
            }
        };
        let instructions = parse_instructions(height, &body.instructions);
        if instructions.is_empty() {
            return Ok(None);
        }

        let env = ProcessEnv::for_height(&self.params, height);
        let (change, state) = match self.committees.commit(&env, &instructions) {
            Ok(committed) => committed,
            Err(failure) if failure.error.is_fatal() => {
                metrics::record_error("committee-state", failure.error.label());
                self.bus
                    .publish(NodeEvent::CriticalError {
                        subsystem: "committee-state",
                        error: failure.error.to_string(),
                    })
                    .await;
                return Err(HandlerError::Fatal {
                    height,
                    source: failure.error,
                });
            }
            Err(failure) => {
                warn!(height, "[committee] Batch not applied: {}", failure.error);
                return Ok(None);
            }
        };

        if change.is_empty() {
            debug!(height, "[committee] Beacon block left committee state unchanged");
            return Ok(None);
        }

        metrics::record_committee_state(&state);
        if let Some(store) = &self.snapshots {
            if let Err(err) = self.committees.persist(store.as_ref()) {
                error!(height, "[committee] Failed to persist snapshot: {}", err);
            }
        }

        self.bus
            .publish(NodeEvent::CommitteeStateCommitted {
                epoch: state.epoch(),
                height: state.height(),
                changed_chains: change.changed_committees(),
                slashed: change.slashed().len(),
            })
            .await;
        Ok(Some(change))
    }

    /// Run until the bus closes or shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), HandlerError> {
        info!("[committee] Beacon instruction handler started");
        let mut missed = self.events.missed();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = self.events.recv() => match event {
                    Some(NodeEvent::BlockFinalized { chain: ChainId::Beacon, block, .. }) => {
                        if self.events.missed() > missed {
                            missed = self.events.missed();
                            error!(
                                missed,
                                height = block.height(),
                                "[committee] Finalized beacon blocks dropped before reaching the handler"
                            );
                        }
                        self.handle_block(&block).await?;
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
        info!("[committee] Beacon instruction handler stopped");
        Ok(())
    }
}

/// Parse raw instructions, skipping the malformed ones.
fn parse_instructions(height: u64, raw: &[Vec<String>]) -> Vec<Instruction> {
    raw.iter()
        .enumerate()
        .filter_map(|(index, raw)| match Instruction::from_raw(raw) {
            Ok(instruction) => Some(instruction),
            Err(err) => {
                let err = CommitteeError::from(err);
                warn!(height, index, label = err.label(), "[committee] Skipping instruction: {}", err);
                None
            }
        })
        .inspect(|instruction| debug!(height, kind = instruction.kind(), "[committee] Instruction parsed"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_01_signature_aggregation::ValidatorSecrets;
    use sc_02_committee_state::{CommitteeState, InMemoryStateStore, StakeChain, StakerInfo, ValidatorRole};
    use shared_bus::{EventFilter, EventTopic, InMemoryEventBus};
    use shared_types::{keccak256, BlockHeader, Fingerprint, ValidatorKey};

    fn key(i: usize) -> ValidatorKey {
        ValidatorSecrets::from_seed(format!("handler-{i}").as_bytes())
            .unwrap()
            .validator_key()
            .unwrap()
    }

    fn beacon_block(height: u64, instructions: Vec<Vec<String>>) -> Block {
        let body = BeaconBody {
            instructions,
            ..BeaconBody::default()
        }
        .encode()
        .unwrap();
        Block {
            header: BlockHeader {
                chain: ChainId::Beacon,
                version: 1,
                height,
                round: 1,
                epoch: 1,
                timestamp: 0,
                previous_hash: [0; 32],
                proposer: Fingerprint::from("p".to_string()),
                committee_root: [0; 32],
                body_root: keccak256(&body),
                cross_shard_root: [0; 32],
                beacon_height: 0,
            },
            body,
            validation: None,
        }
    }

    fn stake_raw(key: &ValidatorKey) -> Vec<String> {
        Instruction::stake(StakeChain::Shard, vec![key.clone()], vec!["r".into()], vec![true], vec![100])
            .unwrap()
            .to_raw()
    }

    struct Setup {
        bus: Arc<InMemoryEventBus>,
        store: Arc<CommitteeStateStore>,
        snapshots: Arc<InMemoryStateStore>,
        handler: BeaconInstructionHandler,
    }

    fn setup() -> Setup {
        let state = CommitteeState::builder(2)
            .beacon_committee(key(0), StakerInfo::fixed(100, "r", 60))
            .shard_committee(0, key(1), StakerInfo::fixed(100, "r", 60))
            .shard_committee(1, key(2), StakerInfo::fixed(100, "r", 60))
            .epoch(1)
            .build()
            .unwrap();
        let bus = Arc::new(InMemoryEventBus::new());
        let store = Arc::new(CommitteeStateStore::new(state));
        let snapshots = Arc::new(InMemoryStateStore::new());
        let events = bus.subscribe(EventFilter::topics(vec![EventTopic::Consensus]).for_chain(ChainId::Beacon));
        let handler = BeaconInstructionHandler::new(
            events,
            Arc::clone(&store),
            CommitteeParams::for_testing(),
            bus.clone(),
        )
        .with_snapshot_store(snapshots.clone());
        Setup {
            bus,
            store,
            snapshots,
            handler,
        }
    }

    #[tokio::test]
    async fn test_stake_instruction_committed_and_announced() {
        let setup = setup();
        let mut committed = setup
            .bus
            .subscribe(EventFilter::topics(vec![EventTopic::CommitteeState]));
        let staker = key(7);

        let change = setup
            .handler
            .handle_block(&beacon_block(3, vec![stake_raw(&staker)]))
            .await
            .unwrap();
        assert!(change.is_some());

        let state = setup.store.current();
        assert_eq!(state.height(), 3);
        assert!(matches!(
            state.role_of(staker.fingerprint()),
            Some(ValidatorRole::Candidate { .. })
        ));
        assert!(matches!(
            committed.try_recv(),
            Ok(Some(NodeEvent::CommitteeStateCommitted { height: 3, .. }))
        ));
        let (height, _) = setup
            .snapshots
            .latest_committee_snapshot(ChainId::Beacon)
            .unwrap()
            .unwrap();
        assert_eq!(height, 3);
    }

    #[tokio::test]
    async fn test_malformed_instruction_skipped() {
        let setup = setup();
        let staker = key(8);
        let garbage = vec!["teleport".to_string(), "x".to_string()];

        setup
            .handler
            .handle_block(&beacon_block(4, vec![garbage, stake_raw(&staker)]))
            .await
            .unwrap();
        assert!(setup.store.current().staker_info(staker.fingerprint()).is_some());
    }

    #[tokio::test]
    async fn test_old_and_empty_blocks_ignored() {
        let setup = setup();
        setup
            .handler
            .handle_block(&beacon_block(5, vec![stake_raw(&key(9))]))
            .await
            .unwrap();

        // Replaying an already applied height does nothing.
        let replay = setup
            .handler
            .handle_block(&beacon_block(5, vec![stake_raw(&key(10))]))
            .await
            .unwrap();
        assert!(replay.is_none());
        assert!(setup.store.current().staker_info(key(10).fingerprint()).is_none());

        let empty = setup.handler.handle_block(&beacon_block(6, Vec::new())).await.unwrap();
        assert!(empty.is_none());
        assert_eq!(setup.store.current().height(), 5);
    }

    #[tokio::test]
    async fn test_run_consumes_finalized_beacon_blocks() {
        let setup = setup();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let store = Arc::clone(&setup.store);
        let bus = setup.bus.clone();
        let mut updates = store.subscribe();
        let task = tokio::spawn(setup.handler.run(shutdown_rx));

        let block = beacon_block(2, vec![stake_raw(&key(11))]);
        bus.publish(NodeEvent::BlockFinalized {
            chain: ChainId::Beacon,
            height: 2,
            round: 1,
            hash: block.hash(),
            block: Arc::new(block),
        })
        .await;

        tokio::time::timeout(std::time::Duration::from_secs(5), updates.changed())
            .await
            .expect("snapshot published")
            .unwrap();
        assert_eq!(store.current().height(), 2);

        shutdown_tx.send(true).unwrap();
        assert!(task.await.unwrap().is_ok());
    }
}
