//! Processor tests.

use proptest::prelude::*;
use shared_types::{ChainId, ValidatorKey};

use crate::algorithms::shard_assignment::assign_candidates;
use crate::algorithms::swap_rule::SwapRule;
use crate::domain::errors::CommitteeError;
use crate::domain::instruction::{Instruction, StakeChain};
use crate::domain::params::{CommitteeParams, ProcessEnv, SwapRuleSchedule};
use crate::domain::staker::StakerInfo;
use crate::domain::state::{CommitteeState, ListId};
use crate::domain::test_keys::key;
use crate::service::InstructionProcessor;

fn params() -> CommitteeParams {
    CommitteeParams::for_testing()
}

/// Height 10 closes epoch 1 and is not random time.
fn swap_env() -> ProcessEnv {
    ProcessEnv::for_height(&params(), 10)
}

fn random_env() -> ProcessEnv {
    ProcessEnv::for_height(&params(), 5)
}

fn member(score: u64) -> StakerInfo {
    StakerInfo::new(100, "rr", true, score)
}

fn stake(chain: StakeChain, i: u8) -> Instruction {
    Instruction::stake(chain, vec![key(i)], vec!["rr".into()], vec![true], vec![100]).unwrap()
}

fn epoch_edge_state() -> CommitteeState {
    CommitteeState::builder(1)
        .beacon_committee(key(1), StakerInfo::fixed(100, "rr", 0))
        .beacon_committee(key(2), member(50))
        .beacon_committee(key(3), member(20))
        .beacon_committee(key(4), member(70))
        .beacon_substitute(key(5), member(80))
        .beacon_substitute(key(6), member(40))
        .shard_committee(0, key(20), member(60))
        .build()
        .unwrap()
}

fn fingerprints(keys: &[ValidatorKey]) -> Vec<shared_types::Fingerprint> {
    keys.iter().map(|k| k.fingerprint().clone()).collect()
}

#[test]
fn test_beacon_swap_at_epoch_edge() {
    let pre = epoch_edge_state();
    let mut state = pre.clone();
    let swap = Instruction::swap(ChainId::Beacon, vec![], vec![], false).unwrap();

    let change = state.process_batch(&swap_env(), &[swap]).unwrap();

    assert_eq!(state.beacon_committee(), &[key(1), key(4), key(5), key(2)]);
    assert_eq!(state.beacon_substitute(), &[key(6), key(3)]);
    assert_eq!(change.swapped_in(), fingerprints(&[key(5)]).as_slice());
    assert_eq!(change.swapped_out(), fingerprints(&[key(3)]).as_slice());
    assert_eq!(
        state.staker_info(key(5).fingerprint()).unwrap().performance,
        params().default_performing
    );
    assert_eq!(change.apply_to(&pre).unwrap(), state);
}

#[test]
fn test_swap_instruction_must_match_rule() {
    let mut state = epoch_edge_state();
    let wrong = Instruction::swap(ChainId::Beacon, vec![key(6)], vec![key(3)], false).unwrap();
    let change = state.process_batch(&swap_env(), &[wrong]).unwrap();
    assert!(change.lists.is_empty());

    let built = InstructionProcessor::build_swap_instruction(&state, &swap_env(), ChainId::Beacon)
        .unwrap()
        .unwrap();
    let change = state.process_batch(&swap_env(), &[built]).unwrap();
    assert_eq!(change.swapped_in(), fingerprints(&[key(5)]).as_slice());
}

#[test]
fn test_swap_rejected_at_random_time() {
    let mut state = epoch_edge_state();
    let swap = Instruction::swap(ChainId::Beacon, vec![], vec![], false).unwrap();
    let change = state.process_batch(&random_env(), &[swap]).unwrap();
    assert!(change.lists.is_empty());
    assert!(change.events.is_empty());
}

#[test]
fn test_random_time_assignment() {
    let mut builder = CommitteeState::builder(4);
    for sid in 0..4u8 {
        builder = builder.shard_committee(sid, key(100 + sid), member(60));
    }
    for i in 1..=4 {
        builder = builder.current_candidate(key(i), member(60));
    }
    let mut state = builder.build().unwrap();
    let candidates = state.candidates_current_random().to_vec();

    let change = state
        .process_batch(&random_env(), &[Instruction::random(1234, 0, 0)])
        .unwrap();

    let expected = assign_candidates(&candidates, &[0, 0, 0, 0], 1234, params().assign_offset);
    assert_eq!(expected.assigned.len(), 4);
    assert!(state.candidates_current_random().is_empty());
    for (k, sid) in &expected.assigned {
        assert!(state.shard_substitute(*sid).contains(k));
        assert_eq!(state.staker_info(k.fingerprint()).unwrap().shard_hint, Some(*sid));
    }
    let total: usize = (0..4).map(|sid| state.shard_substitute(sid).len()).sum();
    assert_eq!(total, 4);
    assert!(state.random_flag());
    assert_eq!(state.random_number(), 1234);
    assert!(change.scalars.is_some());
}

#[test]
fn test_random_with_no_candidates_leaves_state_unchanged() {
    let mut state = epoch_edge_state();
    let before = state.clone();
    let change = state
        .process_batch(&random_env(), &[Instruction::random(9, 0, 0)])
        .unwrap();
    assert!(change.is_empty());
    assert_eq!(state, before);
    assert!(!state.random_flag());
    assert_eq!(state.height(), 0);

    // The flag stays clear, so candidates staked later in the epoch still
    // get a Random.
    state
        .process_batch(&random_env(), &[stake(StakeChain::Shard, 30)])
        .unwrap();
    state
        .process_batch(&random_env(), &[Instruction::random(11, 0, 0)])
        .unwrap();
    assert!(state.random_flag());
    assert_eq!(state.random_number(), 11);
    assert!(state.candidates_next_random().is_empty());
}

#[test]
fn test_second_random_in_epoch_is_skipped() {
    let mut state = epoch_edge_state();
    state
        .process_batch(&random_env(), &[stake(StakeChain::Shard, 30)])
        .unwrap();
    state
        .process_batch(&random_env(), &[Instruction::random(1, 0, 0), Instruction::random(2, 0, 0)])
        .unwrap();
    assert_eq!(state.random_number(), 1);

    // A new epoch resets the flag.
    state
        .process_batch(&random_env(), &[stake(StakeChain::Shard, 31)])
        .unwrap();
    let next_epoch = ProcessEnv::for_height(&params(), 15);
    state
        .process_batch(&next_epoch, &[Instruction::random(3, 0, 0)])
        .unwrap();
    assert_eq!(state.random_number(), 3);
    assert_eq!(state.epoch(), 2);
}

#[test]
fn test_random_carries_leftovers_and_drops_unstaking() {
    let mut p = params();
    p.assign_offset = 1;
    let env = ProcessEnv::for_height(&p, 5);
    let mut builder = CommitteeState::builder(1).shard_committee(0, key(100), member(60));
    for i in 1..=3 {
        builder = builder.next_candidate(key(i), member(60));
    }
    let mut state = builder.build().unwrap();
    state.staker_info.get_mut(key(3).fingerprint()).unwrap().unstake_requested = true;

    let change = state.process_batch(&env, &[Instruction::random(7, 0, 0)]).unwrap();

    assert_eq!(state.shard_substitute(0).len(), 1);
    assert_eq!(state.candidates_next_random().len(), 1);
    assert!(state.staker_info(key(3).fingerprint()).is_none());
    assert_eq!(change.events.unstaked, fingerprints(&[key(3)]));
}

#[test]
fn test_assign_must_match_deterministic_assignment() {
    let mut builder = CommitteeState::builder(2)
        .shard_committee(0, key(100), member(60))
        .shard_committee(1, key(101), member(60));
    for i in 1..=2 {
        builder = builder.current_candidate(key(i), member(60));
    }
    let mut state = builder.random_number(42).build().unwrap();
    state.scalars.random_flag = true;

    let expected = assign_candidates(state.candidates_current_random(), &[0, 0], 42, 4);
    let (k, sid) = expected.assigned[0].clone();
    let wrong = Instruction::assign(vec![(k.clone(), 1 - sid)]).unwrap();
    let env = ProcessEnv::for_height(&params(), 3);
    state.process_batch(&env, &[wrong]).unwrap();
    assert_eq!(state.candidates_current_random().len(), 2);

    let built = InstructionProcessor::build_assign_instruction(&state, &params())
        .unwrap()
        .unwrap();
    state.process_batch(&env, &[built]).unwrap();
    assert!(state.candidates_current_random().is_empty());
    assert!(state.shard_substitute(sid).contains(&k));
}

#[test]
fn test_random_leaves_nothing_for_assign() {
    let mut state = CommitteeState::builder(2)
        .shard_committee(0, key(100), member(60))
        .shard_committee(1, key(101), member(60))
        .next_candidate(key(1), member(60))
        .build()
        .unwrap();
    state
        .process_batch(&random_env(), &[Instruction::random(42, 0, 0)])
        .unwrap();
    assert!(state.candidates_current_random().is_empty());
    assert!(InstructionProcessor::build_assign_instruction(&state, &params())
        .unwrap()
        .is_none());

    // A replayed placement for an already placed key is skipped.
    let sid = state.staker_info(key(1).fingerprint()).unwrap().shard_hint.unwrap();
    let before = state.clone();
    let replay = Instruction::assign(vec![(key(1), sid)]).unwrap();
    let change = state.process_batch(&random_env(), &[replay]).unwrap();
    assert!(change.is_empty());
    assert_eq!(state, before);
}

#[test]
fn test_slashing_supersedes_auto_stake() {
    let mut state = CommitteeState::builder(3)
        .shard_committee(0, key(30), member(60))
        .shard_committee(1, key(31), member(60))
        .shard_committee(2, key(7), member(5))
        .shard_committee(2, key(8), member(50))
        .build()
        .unwrap();
    let v = key(7);

    let swap = Instruction::swap(ChainId::Shard(2), vec![], vec![], false).unwrap();
    let change = state
        .process_batch(&swap_env(), &[swap, stake(StakeChain::Shard, 7)])
        .unwrap();

    assert_eq!(change.slashed(), fingerprints(&[v.clone()]).as_slice());
    assert_eq!(state.shard_committee(2), &[key(8)]);
    // The fresh stake re-introduced the key as a candidate.
    assert_eq!(state.role_of(v.fingerprint()), Some(crate::ValidatorRole::Candidate { current: false }));
    assert!(state.staker_info(v.fingerprint()).unwrap().auto_stake);
}

#[test]
fn test_unstake_after_slashing_is_ignored() {
    let mut state = CommitteeState::builder(1)
        .shard_committee(0, key(7), member(60))
        .shard_committee(0, key(8), member(60))
        .build()
        .unwrap();
    let batch = [
        Instruction::slashing(vec![key(7)]).unwrap(),
        stake(StakeChain::Shard, 7),
        Instruction::unstake(vec![key(7)]).unwrap(),
    ];
    let change = state.process_batch(&swap_env(), &batch).unwrap();
    assert_eq!(change.slashed(), fingerprints(&[key(7)]).as_slice());
    assert!(!state.staker_info(key(7).fingerprint()).unwrap().unstake_requested);
}

#[test]
fn test_slashing_instruction_skips_fixed_and_minimum() {
    let mut state = CommitteeState::builder(1)
        .beacon_committee(key(1), StakerInfo::fixed(100, "rr", 60))
        .shard_committee(0, key(7), member(60))
        .build()
        .unwrap();
    let change = state
        .process_batch(&swap_env(), &[Instruction::slashing(vec![key(1), key(7), key(9)]).unwrap()])
        .unwrap();
    assert!(change.slashed().is_empty());
    assert_eq!(state.shard_committee(0), &[key(7)]);
}

#[test]
fn test_duplicate_stake_is_skipped() {
    let mut state = epoch_edge_state();
    let batch = [stake(StakeChain::Beacon, 2), stake(StakeChain::Shard, 40)];
    let change = state.process_batch(&swap_env(), &batch).unwrap();
    assert_eq!(state.locate(key(2).fingerprint()), Some(ListId::BeaconCommittee));
    assert_eq!(state.candidates_next_random(), &[key(40)]);
    assert!(change.lists.contains_key(&ListId::NextCandidates));
}

#[test]
fn test_beacon_stake_joins_substitute() {
    let mut state = epoch_edge_state();
    state
        .process_batch(&swap_env(), &[stake(StakeChain::Beacon, 40)])
        .unwrap();
    assert_eq!(state.beacon_substitute().last(), Some(&key(40)));
}

#[test]
fn test_stop_auto_stake() {
    let mut state = epoch_edge_state();
    state
        .process_batch(&swap_env(), &[stake(StakeChain::Shard, 40)])
        .unwrap();

    let change = state
        .process_batch(&swap_env(), &[Instruction::stop_auto_stake(vec![key(2), key(40)]).unwrap()])
        .unwrap();

    assert!(!state.staker_info(key(2).fingerprint()).unwrap().auto_stake);
    assert!(state.staker_info(key(40).fingerprint()).is_none());
    assert!(state.candidates_next_random().is_empty());
    assert_eq!(change.stop_auto_stake(), fingerprints(&[key(2), key(40)]).as_slice());
}

#[test]
fn test_unstake_applies_at_swap_boundary() {
    let mut state = epoch_edge_state();
    state
        .process_batch(&swap_env(), &[Instruction::unstake(vec![key(6), key(1)]).unwrap()])
        .unwrap();
    assert!(state.staker_info(key(6).fingerprint()).unwrap().unstake_requested);
    // Fixed nodes ignore unstake.
    assert!(!state.staker_info(key(1).fingerprint()).unwrap().unstake_requested);
    assert!(state.beacon_substitute().contains(&key(6)));

    let swap = Instruction::swap(ChainId::Beacon, vec![], vec![], false).unwrap();
    let change = state.process_batch(&swap_env(), &[swap]).unwrap();
    assert!(!state.beacon_substitute().contains(&key(6)));
    assert!(state.staker_info(key(6).fingerprint()).is_none());
    assert_eq!(change.events.unstaked, fingerprints(&[key(6)]));
}

#[test]
fn test_replace_swap_is_positional() {
    let mut state = epoch_edge_state();
    let replace = Instruction::swap(ChainId::Beacon, vec![key(6)], vec![key(2)], true).unwrap();
    let change = state.process_batch(&random_env(), &[replace]).unwrap();
    assert_eq!(state.beacon_committee(), &[key(1), key(6), key(3), key(4)]);
    assert_eq!(state.beacon_substitute(), &[key(5), key(2)]);
    assert_eq!(change.swapped_in(), fingerprints(&[key(6)]).as_slice());

    let fixed = Instruction::swap(ChainId::Beacon, vec![key(5)], vec![key(1)], true).unwrap();
    let change = state.process_batch(&random_env(), &[fixed]).unwrap();
    assert!(change.lists.is_empty());
}

#[test]
fn test_unknown_shard_is_skipped() {
    let mut state = epoch_edge_state();
    let swap = Instruction::swap(ChainId::Shard(9), vec![], vec![], false).unwrap();
    let change = state.process_batch(&swap_env(), &[swap]).unwrap();
    assert!(change.lists.is_empty());
}

#[test]
fn test_invariant_violation_aborts_batch() {
    let mut p = params();
    p.min_shard_committee_size = 2;
    let env = ProcessEnv::for_height(&p, 10);
    let pre = epoch_edge_state();
    let mut state = pre.clone();

    let failure = state
        .process_batch(&env, &[stake(StakeChain::Shard, 40)])
        .unwrap_err();
    assert!(matches!(failure.error, CommitteeError::InvariantViolation(_)));
    assert!(failure.error.is_fatal());
    assert!(failure.partial.lists.is_empty());
    assert!(state.candidates_next_random().is_empty());
}

#[test]
fn test_empty_batch_is_identity() {
    let pre = epoch_edge_state();
    let mut state = pre.clone();
    let change = state.process_batch(&swap_env(), &[]).unwrap();
    assert!(change.is_empty());
    assert_eq!(state, pre);
}

#[test]
fn test_epoch_swaps_cover_every_chain() {
    let mut state = epoch_edge_state();
    state.shard_substitute.get_mut(&0).unwrap().push(key(21));
    state
        .staker_info
        .insert(key(21).fingerprint().clone(), StakerInfo::new(1, "rr", true, 60));
    let mut env = swap_env();
    env.swap_rule = SwapRule::Base;
    env.params.max_shard_committee_size = 2;
    env.params.max_swap_in_percent = 100;
    env.params.swap_rules = SwapRuleSchedule::fixed(SwapRule::Base);

    let swaps = InstructionProcessor::build_epoch_swaps(&state, &env).unwrap();
    let chains: Vec<ChainId> = swaps
        .iter()
        .filter_map(|i| match i {
            Instruction::Swap(s) => Some(s.chain),
            _ => None,
        })
        .collect();
    assert_eq!(chains, vec![ChainId::Beacon, ChainId::Shard(0)]);

    let change = state.process_batch(&env, &swaps).unwrap();
    assert_eq!(state.shard_committee(0).len(), 2);
    assert_eq!(change.changed_committees(), vec![ChainId::Beacon, ChainId::Shard(0)]);
}

fn instruction_strategy() -> impl Strategy<Value = Instruction> {
    prop_oneof![
        (40u8..50).prop_map(|i| stake(StakeChain::Shard, i)),
        (40u8..50).prop_map(|i| stake(StakeChain::Beacon, i)),
        (1u8..10).prop_map(|i| Instruction::unstake(vec![key(i)]).unwrap()),
        (1u8..10).prop_map(|i| Instruction::stop_auto_stake(vec![key(i)]).unwrap()),
        (1u8..10).prop_map(|i| Instruction::slashing(vec![key(i)]).unwrap()),
        Just(Instruction::swap(ChainId::Beacon, vec![], vec![], false).unwrap()),
        any::<u64>().prop_map(|n| Instruction::random(n, 0, 0)),
    ]
}

proptest! {
    #[test]
    fn prop_processing_is_functional_and_keeps_invariants(
        batch in proptest::collection::vec(instruction_strategy(), 0..12),
        height in 1u64..30,
    ) {
        let env = ProcessEnv::for_height(&params(), height);
        let pre = epoch_edge_state();

        let mut a = pre.clone();
        let mut b = pre.clone();
        let change_a = a.process_batch(&env, &batch).unwrap();
        let change_b = b.process_batch(&env, &batch).unwrap();

        prop_assert_eq!(&a, &b);
        prop_assert_eq!(&change_a, &change_b);
        prop_assert!(a.check_invariants(&env.params, env.is_bootstrap).is_ok());
        prop_assert_eq!(change_a.apply_to(&pre).unwrap(), a);
    }
}
