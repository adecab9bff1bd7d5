//! # Consensus Flow
//!
//! Several BFT drivers, each holding one validator's secrets, share a
//! beacon chain and exchange proposals and votes over the loopback network.
//! A relay task stands in for gossip and fans every message out to every
//! driver.

use std::sync::Arc;

use sc_04_bft::{DriverHandle, DriverInput};
use shared_types::{InboundMessage, WireMessage};
use tokio::sync::{mpsc, watch};

/// Driver input carried by a wire message, if any.
pub fn driver_input(message: &WireMessage) -> Option<DriverInput> {
    match message {
        WireMessage::Propose(propose) => Some(DriverInput::Propose(propose.clone())),
        WireMessage::Vote(vote) => Some(DriverInput::Vote(vote.clone())),
        WireMessage::BeaconBlock(_) => Some(DriverInput::ChainAdvanced),
        _ => None,
    }
}

/// Fan inbound messages out to `drivers`, each `copies` times, until
/// `stop` fires. Returns the drivers for shutdown.
pub async fn relay(
    mut inbound: mpsc::Receiver<InboundMessage>,
    drivers: Vec<DriverHandle>,
    copies: usize,
    mut stop: watch::Receiver<bool>,
    tap: Option<Arc<dyn Fn(&WireMessage) -> Vec<DriverInput> + Send + Sync>>,
) -> Vec<DriverHandle> {
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            msg = inbound.recv() => {
                let Some(msg) = msg else { break };
                let mut inputs = Vec::new();
                if let Some(input) = driver_input(&msg.message) {
                    inputs.extend(std::iter::repeat(input).take(copies));
                }
                if let Some(tap) = &tap {
                    inputs.extend(tap(&msg.message));
                }
                for input in inputs {
                    for driver in &drivers {
                        driver.send(input.clone());
                    }
                }
            }
        }
    }
    drivers
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use node_runtime::adapters::{ChainTiming, InMemoryChain, LoopbackNetwork};
    use node_runtime::orchestrator::{BftDriverFactory, DriverFactory};
    use sc_01_signature_aggregation::{
        quorum_threshold, AggregateSig, MultiSignature, SignatureAggregator, ValidatorSecrets,
    };
    use sc_02_committee_state::{CommitteeParams, CommitteeState, CommitteeStateStore, InMemoryStateStore, StakerInfo};
    use sc_04_bft::{BftConfig, ConsensusNetwork};
    use shared_bus::{EventFilter, EventTopic, InMemoryEventBus, NodeEvent};
    use shared_types::{keccak256, ChainId, ValidatorKey, VoteMsg};

    use super::*;
    use crate::integration::{key, secrets};

    const SCOPE: &str = "consensus-flow";
    const GENESIS_MS: i64 = 1_700_000_000_000;

    struct Cluster {
        chain: Arc<InMemoryChain>,
        bus: Arc<InMemoryEventBus>,
        committee: Vec<ValidatorKey>,
        stop: watch::Sender<bool>,
        relay: Option<tokio::task::JoinHandle<Vec<DriverHandle>>>,
    }

    impl Cluster {
        /// A beacon committee of `size`; drivers run for the `online`
        /// members only.
        fn start(
            size: usize,
            online: &[usize],
            copies: usize,
            tap: Option<Arc<dyn Fn(&WireMessage) -> Vec<DriverInput> + Send + Sync>>,
        ) -> Self {
            let secrets: Vec<ValidatorSecrets> = (0..size).map(|i| secrets(SCOPE, i)).collect();
            let committee: Vec<ValidatorKey> = secrets.iter().map(|s| s.validator_key().unwrap()).collect();

            let mut builder = CommitteeState::builder(1);
            for (i, member) in committee.iter().enumerate() {
                let info = if i == 0 {
                    StakerInfo::fixed(100, "rr", 60)
                } else {
                    StakerInfo::new(100, "rr", true, 60)
                };
                builder = builder.beacon_committee(member.clone(), info);
            }
            let state = builder
                .shard_committee(0, key(SCOPE, 100), StakerInfo::fixed(100, "rr", 60))
                .epoch(1)
                .build()
                .unwrap();

            let config = BftConfig::for_testing();
            let mut params = CommitteeParams::for_testing();
            params.active_shards = 1;
            let committees = Arc::new(CommitteeStateStore::new(state));
            let (inbound_tx, inbound_rx) = mpsc::channel(1_024);
            let network = Arc::new(LoopbackNetwork::new(inbound_tx));
            let chain = Arc::new(
                InMemoryChain::new(
                    ChainId::Beacon,
                    committees,
                    params,
                    ChainTiming::from(&config),
                    Arc::new(InMemoryStateStore::new()),
                    GENESIS_MS,
                )
                .with_network(network.clone() as Arc<dyn ConsensusNetwork>),
            );
            let bus = Arc::new(InMemoryEventBus::new());

            let drivers = online
                .iter()
                .map(|&i| {
                    BftDriverFactory::new(config.clone(), Arc::clone(&network))
                        .with_chain(ChainId::Beacon, Arc::clone(&chain))
                        .with_identity(Some(secrets[i].clone()))
                        .with_event_bus(bus.clone())
                        .spawn_driver(ChainId::Beacon)
                        .unwrap()
                })
                .collect();

            let (stop, stop_rx) = watch::channel(false);
            let relay = tokio::spawn(relay(inbound_rx, drivers, copies, stop_rx, tap));
            Self {
                chain,
                bus,
                committee,
                stop,
                relay: Some(relay),
            }
        }

        async fn wait_for_height(&self, height: u64) {
            tokio::time::timeout(Duration::from_secs(30), async {
                while self.chain.tip_height() < height {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            })
            .await
            .expect("cluster finalizes");
        }

        /// Signer indexes of block `height`, after checking its aggregate.
        fn verified_signers(&self, height: u64) -> Vec<usize> {
            let block = self.chain.block_at(height).expect("block stored");
            let aggregate = AggregateSig::from_validation_data(block.validation.as_ref().expect("signed")).unwrap();
            SignatureAggregator::new()
                .verify_aggregate(&block.hash(), &self.committee, &aggregate)
                .expect("aggregate verifies");
            aggregate.signers()
        }

        async fn shutdown(mut self) {
            let _ = self.stop.send(true);
            if let Some(relay) = self.relay.take() {
                for driver in relay.await.unwrap() {
                    driver.shutdown().await;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_four_validators_finalize_despite_duplicate_delivery() {
        // Every message arrives twice.
        let cluster = Cluster::start(4, &[0, 1, 2, 3], 2, None);
        let mut events = cluster.bus.subscribe(EventFilter::topics(vec![EventTopic::Consensus]));

        cluster.wait_for_height(2).await;

        for height in 1..=2 {
            let signers = cluster.verified_signers(height);
            assert!(signers.len() >= quorum_threshold(4));
        }
        let mut finalized = Vec::new();
        while let Ok(Some(event)) = events.try_recv() {
            if let NodeEvent::BlockFinalized { height, .. } = event {
                finalized.push(height);
            }
        }
        // Each height is inserted by exactly one driver.
        let ones = finalized.iter().filter(|h| **h == 1).count();
        assert_eq!(ones, 1);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_offline_member_and_forged_votes_tolerated() {
        let forger = secrets(SCOPE, 3);
        let forged_key = forger.validator_key().unwrap();
        // Member 3 is offline; a forger replays every honest vote under
        // member 3's identity but over a different digest.
        let tap: Arc<dyn Fn(&WireMessage) -> Vec<DriverInput> + Send + Sync> = Arc::new(move |message| {
            let WireMessage::Vote(vote) = message else {
                return Vec::new();
            };
            if vote.validator == *forged_key.fingerprint() {
                return Vec::new();
            }
            let digest = keccak256(&vote.block_hash);
            let partial = SignatureAggregator::new().sign(&digest, &forger.mining).unwrap();
            vec![DriverInput::Vote(VoteMsg {
                validator: forged_key.fingerprint().clone(),
                partial_signature: partial.as_bytes().to_vec(),
                ..vote.clone()
            })]
        });
        let cluster = Cluster::start(4, &[0, 1, 2], 1, Some(tap));

        cluster.wait_for_height(2).await;

        for height in 1..=2 {
            let signers = cluster.verified_signers(height);
            assert_eq!(signers, vec![0, 1, 2]);
        }
        cluster.shutdown().await;
    }
}
