//! # Committee Flow
//!
//! Beacon blocks carrying instructions are folded into the committee state
//! by the instruction handler, exactly as a running node does it:
//!
//! ```text
//! InstructionProcessor::build_* → BeaconBody → Block
//!     → BeaconInstructionHandler → CommitteeStateStore → CommitteeStateCommitted
//! ```

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use node_runtime::container::NodeConfig;
    use node_runtime::handlers::{BeaconInstructionHandler, HandlerError};
    use node_runtime::NodeContainer;
    use sc_02_committee_state::{
        assign_candidates, CommitteeError, CommitteeParams, CommitteeState, CommitteeStateStore, InMemoryStateStore,
        Instruction, InstructionProcessor, ProcessEnv, StakeChain, StakerInfo, StateStore, ValidatorRole,
    };
    use shared_bus::{EventFilter, EventTopic, InMemoryEventBus, NodeEvent, Subscription};
    use shared_types::{keccak256, BeaconBody, Block, BlockHeader, ChainId, Fingerprint, ValidatorKey};

    use crate::integration::key;

    const SCOPE: &str = "committee-flow";

    fn k(i: usize) -> ValidatorKey {
        key(SCOPE, i)
    }

    fn member(performance: u64) -> StakerInfo {
        StakerInfo::new(100, "rr", true, performance)
    }

    fn fingerprints(keys: &[ValidatorKey]) -> Vec<Fingerprint> {
        keys.iter().map(|k| k.fingerprint().clone()).collect()
    }

    fn beacon_block(height: u64, instructions: &[Instruction]) -> Block {
        let body = BeaconBody {
            instructions: instructions.iter().map(Instruction::to_raw).collect(),
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
                epoch: CommitteeParams::for_testing().epoch_of(height),
                timestamp: 1_700_000_000_000 + height as i64 * 1_000,
                previous_hash: [0; 32],
                proposer: k(0).fingerprint().clone(),
                committee_root: [0; 32],
                body_root: keccak256(&body),
                cross_shard_root: [0; 32],
                beacon_height: 0,
            },
            body,
            validation: None,
        }
    }

    /// A handler over `state` plus a subscription to its announcements.
    struct Harness {
        store: Arc<CommitteeStateStore>,
        snapshots: Arc<InMemoryStateStore>,
        announcements: Subscription,
        handler: BeaconInstructionHandler,
    }

    impl Harness {
        fn new(state: CommitteeState, params: CommitteeParams) -> Self {
            let bus = Arc::new(InMemoryEventBus::new());
            let store = Arc::new(CommitteeStateStore::new(state));
            let snapshots = Arc::new(InMemoryStateStore::new());
            let announcements = bus.subscribe(EventFilter::topics(vec![
                EventTopic::CommitteeState,
                EventTopic::DeadLetterQueue,
            ]));
            let events = bus.subscribe(EventFilter::topics(vec![EventTopic::Consensus]).for_chain(ChainId::Beacon));
            let handler = BeaconInstructionHandler::new(events, Arc::clone(&store), params, bus)
                .with_snapshot_store(snapshots.clone());
            Self {
                store,
                snapshots,
                announcements,
                handler,
            }
        }

        fn next_announcement(&mut self) -> Option<NodeEvent> {
            self.announcements.try_recv().ok().flatten()
        }
    }

    fn epoch_edge_state() -> CommitteeState {
        CommitteeState::builder(1)
            .beacon_committee(k(1), StakerInfo::fixed(100, "rr", 0))
            .beacon_committee(k(2), member(50))
            .beacon_committee(k(3), member(20))
            .beacon_committee(k(4), member(70))
            .beacon_substitute(k(5), member(80))
            .beacon_substitute(k(6), member(40))
            .shard_committee(0, k(20), member(60))
            .epoch(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_epoch_edge_swap_flows_through_beacon_block() {
        let params = CommitteeParams::for_testing();
        let pre = epoch_edge_state();
        let mut harness = Harness::new(pre.clone(), params.clone());

        // The beacon producer builds the swap at the epoch's last height.
        let env = ProcessEnv::for_height(&params, 10);
        let swap = InstructionProcessor::build_swap_instruction(&pre, &env, ChainId::Beacon)
            .unwrap()
            .expect("the weakest member is swapped out");

        let change = harness
            .handler
            .handle_block(&beacon_block(10, &[swap]))
            .await
            .unwrap()
            .expect("snapshot committed");

        let state = harness.store.current();
        assert_eq!(state.beacon_committee(), &[k(1), k(4), k(5), k(2)]);
        assert_eq!(state.beacon_substitute(), &[k(6), k(3)]);
        assert_eq!(change.swapped_in(), fingerprints(&[k(5)]).as_slice());
        assert_eq!(change.swapped_out(), fingerprints(&[k(3)]).as_slice());
        assert_eq!(
            state.staker_info(k(5).fingerprint()).unwrap().performance,
            params.default_performing
        );
        // The change alone reproduces the new state from the old one.
        assert_eq!(change.apply_to(&pre).unwrap(), *state);

        match harness.next_announcement() {
            Some(NodeEvent::CommitteeStateCommitted {
                height, changed_chains, ..
            }) => {
                assert_eq!(height, 10);
                assert_eq!(changed_chains, vec![ChainId::Beacon]);
            }
            other => panic!("expected a commit announcement, got {other:?}"),
        }
        let (persisted, _) = harness
            .snapshots
            .latest_committee_snapshot(ChainId::Beacon)
            .unwrap()
            .unwrap();
        assert_eq!(persisted, 10);
    }

    #[tokio::test]
    async fn test_random_time_assigns_candidates_to_shards() {
        let params = CommitteeParams::for_testing();
        let mut builder = CommitteeState::builder(4);
        for sid in 0..4u8 {
            builder = builder.shard_committee(sid, k(100 + usize::from(sid)), member(60));
        }
        for i in 1..=4 {
            builder = builder.current_candidate(k(i), member(60));
        }
        let pre = builder.epoch(1).build().unwrap();
        let candidates = pre.candidates_current_random().to_vec();
        let harness = Harness::new(pre, params.clone());

        // Height 5 is the epoch's random time.
        harness
            .handler
            .handle_block(&beacon_block(5, &[Instruction::random(1234, 0, 0)]))
            .await
            .unwrap()
            .expect("snapshot committed");

        let state = harness.store.current();
        let expected = assign_candidates(&candidates, &[0, 0, 0, 0], 1234, params.assign_offset);
        assert!(state.random_flag());
        assert_eq!(state.random_number(), 1234);
        assert!(state.candidates_current_random().is_empty());
        for (candidate, sid) in &expected.assigned {
            assert!(state.shard_substitute(*sid).contains(candidate));
            assert_eq!(
                state.role_of(candidate.fingerprint()),
                Some(ValidatorRole::Substitute(ChainId::Shard(*sid)))
            );
        }
        // Nothing is left for a follow-up assign instruction.
        assert!(InstructionProcessor::build_assign_instruction(&state, &params)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_slashed_validator_restakes_as_candidate() {
        let params = CommitteeParams::for_testing();
        let pre = CommitteeState::builder(3)
            .shard_committee(0, k(30), member(60))
            .shard_committee(1, k(31), member(60))
            .shard_committee(2, k(7), member(5))
            .shard_committee(2, k(8), member(50))
            .epoch(1)
            .build()
            .unwrap();
        let mut harness = Harness::new(pre.clone(), params.clone());

        let env = ProcessEnv::for_height(&params, 10);
        let swap = InstructionProcessor::build_swap_instruction(&pre, &env, ChainId::Shard(2))
            .unwrap()
            .expect("the under-performer is slashed");
        let restake = Instruction::stake(StakeChain::Shard, vec![k(7)], vec!["rr".into()], vec![true], vec![100]).unwrap();

        let change = harness
            .handler
            .handle_block(&beacon_block(10, &[swap, restake]))
            .await
            .unwrap()
            .expect("snapshot committed");

        let state = harness.store.current();
        assert_eq!(change.slashed(), fingerprints(&[k(7)]).as_slice());
        assert_eq!(state.shard_committee(2), &[k(8)]);
        assert_eq!(
            state.role_of(k(7).fingerprint()),
            Some(ValidatorRole::Candidate { current: false })
        );
        assert!(matches!(
            harness.next_announcement(),
            Some(NodeEvent::CommitteeStateCommitted { slashed: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_invariant_violation_stops_handler() {
        let mut params = CommitteeParams::for_testing();
        params.min_shard_committee_size = 2;
        let pre = epoch_edge_state();
        let mut harness = Harness::new(pre.clone(), params);

        let stake = Instruction::stake(StakeChain::Shard, vec![k(40)], vec!["rr".into()], vec![true], vec![100]).unwrap();
        let result = harness.handler.handle_block(&beacon_block(10, &[stake])).await;

        match result {
            Err(HandlerError::Fatal { height, source }) => {
                assert_eq!(height, 10);
                assert!(matches!(source, CommitteeError::InvariantViolation(_)));
            }
            other => panic!("expected a fatal error, got {other:?}"),
        }
        assert_eq!(*harness.store.current(), pre);
        assert!(matches!(
            harness.next_announcement(),
            Some(NodeEvent::CriticalError {
                subsystem: "committee-state",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_running_node_applies_submitted_stake() {
        let mut config = NodeConfig::for_testing();
        config.genesis.timestamp_ms = Some(1_700_000_000_000);
        let container = NodeContainer::build(config).unwrap();
        let committees = Arc::clone(&container.committees);
        let mut updates = committees.subscribe();
        let staker = k(50);

        let stake = Instruction::stake(StakeChain::Shard, vec![staker.clone()], vec!["rr".into()], vec![true], vec![100])
            .unwrap();
        container.beacon.submit_instruction(stake.to_raw()).unwrap();
        let node = container.start();

        tokio::time::timeout(Duration::from_secs(15), async {
            while committees.current().staker_info(staker.fingerprint()).is_none() {
                updates.changed().await.expect("store alive");
            }
        })
        .await
        .expect("stake applied by a finalized beacon block");

        assert_eq!(
            committees.current().role_of(staker.fingerprint()),
            Some(ValidatorRole::Candidate { current: false })
        );
        node.shutdown().await;
    }
}
