//! # Instruction Processor
//!
//! Folds a batch of instructions into a [`CommitteeState`].
//!
//! Each instruction runs against a scratch copy of the state taken just
//! before it. A recoverable failure restores that copy and moves on; an
//! invariant violation restores it and aborts the batch with the change
//! accumulated so far.

use std::collections::HashSet;

use shared_types::{ChainId, Fingerprint, ValidatorKey};
use tracing::{debug, error, warn};

use crate::algorithms::shard_assignment::{assign_candidates, Assignment};
use crate::algorithms::swap_rule::{SwapInput, SwapOutcome};
use crate::domain::change::{ChangeEvents, CommitteeChange};
use crate::domain::errors::{BatchFailure, CommitteeError, CommitteeResult, InstructionError};
use crate::domain::instruction::{
    Instruction, RandomInstruction, StakeChain, StakeInstruction, SwapInstruction,
};
use crate::domain::params::{CommitteeParams, ProcessEnv};
use crate::domain::staker::StakerInfo;
use crate::domain::state::{CommitteeState, ListId};
use crate::metrics;

#[derive(Debug, Clone, Copy, Default)]
pub struct InstructionProcessor;

impl InstructionProcessor {
    pub fn process_batch(
        state: &mut CommitteeState,
        env: &ProcessEnv,
        instructions: &[Instruction],
    ) -> Result<CommitteeChange, BatchFailure> {
        if instructions.is_empty() {
            return Ok(CommitteeChange::default());
        }

        let pre = state.clone();
        let mut events = ChangeEvents::default();
        let mut slashed_in_batch: HashSet<Fingerprint> = HashSet::new();
        let mut effective = false;

        if env.epoch > state.scalars.epoch {
            state.scalars.epoch = env.epoch;
            state.scalars.random_flag = false;
        }
        state.scalars.is_random_time = env.is_random_time;

        for (index, instruction) in instructions.iter().enumerate() {
            let snapshot = state.clone();
            let result = apply(state, env, instruction, &slashed_in_batch)
                .and_then(|applied| state.check_invariants(&env.params, env.is_bootstrap).map(|_| applied));

            match result {
                Ok(applied) => {
                    metrics::record_instruction(instruction.kind(), "applied");
                    effective |= *state != snapshot;
                    slashed_in_batch.extend(applied.slashed.iter().cloned());
                    events.merge(applied);
                }
                Err(err) if err.is_fatal() => {
                    metrics::record_instruction(instruction.kind(), "fatal");
                    error!(
                        "[committee] Aborting batch at instruction {} ({}): {}",
                        index,
                        instruction.kind(),
                        err
                    );
                    *state = snapshot;
                    let partial = CommitteeChange::between(&pre, state, events);
                    return Err(BatchFailure {
                        partial,
                        error: err,
                    });
                }
                Err(err) => {
                    metrics::record_instruction(instruction.kind(), "skipped");
                    warn!(
                        index,
                        kind = instruction.kind(),
                        reason = err.label(),
                        "[committee] Skipping instruction: {}",
                        err
                    );
                    *state = snapshot;
                }
            }
        }

        // A batch whose instructions all turned out to be no-ops leaves the
        // snapshot untouched, like an empty batch.
        if !effective {
            *state = pre;
            return Ok(CommitteeChange::default());
        }

        state.scalars.height = env.height;
        Ok(CommitteeChange::between(&pre, state, events))
    }

    /// Swap instruction the active rule would apply to `chain`, or `None`
    /// when nothing would move.
    pub fn build_swap_instruction(
        state: &CommitteeState,
        env: &ProcessEnv,
        chain: ChainId,
    ) -> CommitteeResult<Option<Instruction>> {
        let mut scratch = state.clone();
        let unstaked = remove_unstaking(&mut scratch, &env.params, chain, env.is_bootstrap)?;
        let outcome = compute_swap(&scratch, env, chain);
        if outcome.is_noop() && unstaked.is_empty() {
            return Ok(None);
        }
        Ok(Some(Instruction::swap(
            chain,
            outcome.swapped_in,
            outcome.swapped_out,
            false,
        )?))
    }

    /// Swap instructions for the beacon chain and every shard.
    pub fn build_epoch_swaps(state: &CommitteeState, env: &ProcessEnv) -> CommitteeResult<Vec<Instruction>> {
        let chains = std::iter::once(ChainId::Beacon).chain(state.shard_ids().map(ChainId::Shard));
        let mut out = Vec::new();
        for chain in chains {
            if let Some(instruction) = Self::build_swap_instruction(state, env, chain)? {
                out.push(instruction);
            }
        }
        Ok(out)
    }

    /// Assign instruction matching what the current-random pool would get.
    /// `None` after a local `Random`, which leaves that pool empty.
    pub fn build_assign_instruction(
        state: &CommitteeState,
        params: &CommitteeParams,
    ) -> CommitteeResult<Option<Instruction>> {
        if state.candidates_current_random.is_empty() || !state.scalars.random_flag {
            return Ok(None);
        }
        let assignment = compute_assignment(state, params);
        if assignment.assigned.is_empty() {
            return Ok(None);
        }
        Ok(Some(Instruction::assign(assignment.assigned)?))
    }
}

impl CommitteeState {
    pub fn process_batch(
        &mut self,
        env: &ProcessEnv,
        instructions: &[Instruction],
    ) -> Result<CommitteeChange, BatchFailure> {
        InstructionProcessor::process_batch(self, env, instructions)
    }
}

// =============================================================================
// Per-instruction application
// =============================================================================

fn apply(
    state: &mut CommitteeState,
    env: &ProcessEnv,
    instruction: &Instruction,
    slashed_in_batch: &HashSet<Fingerprint>,
) -> CommitteeResult<ChangeEvents> {
    match instruction {
        Instruction::Stake(stake) => apply_stake(state, env, stake),
        Instruction::StopAutoStake { public_keys } => apply_stop_auto_stake(state, public_keys),
        Instruction::Unstake { public_keys } => apply_unstake(state, public_keys, slashed_in_batch),
        Instruction::Swap(swap) if swap.is_replace => apply_replace(state, env, swap),
        Instruction::Swap(swap) => apply_swap(state, env, swap),
        Instruction::Assign { shard_candidates } => apply_assign(state, env, shard_candidates),
        Instruction::Random(random) => apply_random(state, env, random),
        Instruction::Slashing { public_keys } => apply_slashing(state, env, public_keys),
    }
}

fn rejected(reason: impl Into<String>) -> CommitteeError {
    CommitteeError::InvalidInstruction(InstructionError::Rejected(reason.into()))
}

fn check_chain(state: &CommitteeState, chain: ChainId) -> CommitteeResult<()> {
    match chain {
        ChainId::Shard(sid) if u16::from(sid) >= state.active_shards => {
            Err(CommitteeError::UnknownShard(sid))
        }
        _ => Ok(()),
    }
}

fn committee_bounds(params: &CommitteeParams, chain: ChainId) -> (usize, usize) {
    match chain {
        ChainId::Beacon => (params.min_beacon_committee_size, params.max_beacon_committee_size),
        ChainId::Shard(_) => (params.min_shard_committee_size, params.max_shard_committee_size),
    }
}

fn apply_stake(
    state: &mut CommitteeState,
    env: &ProcessEnv,
    stake: &StakeInstruction,
) -> CommitteeResult<ChangeEvents> {
    if let Some(key) = stake
        .public_keys
        .iter()
        .find(|key| state.locate(key.fingerprint()).is_some())
    {
        return Err(CommitteeError::DuplicateStake(key.fingerprint().clone()));
    }

    let target = match stake.chain {
        StakeChain::Beacon => ListId::BeaconSubstitute,
        StakeChain::Shard => ListId::NextCandidates,
    };
    for (i, key) in stake.public_keys.iter().enumerate() {
        let info = StakerInfo::new(
            stake.amounts[i],
            stake.reward_receivers[i].clone(),
            stake.auto_stake[i],
            env.params.default_performing,
        );
        state.staker_info.insert(key.fingerprint().clone(), info);
        state.list_mut(target)?.push(key.clone());
        debug!(validator = %key.fingerprint().short(), list = %target, "[committee] Staked");
    }
    Ok(ChangeEvents::default())
}

fn apply_stop_auto_stake(
    state: &mut CommitteeState,
    keys: &[ValidatorKey],
) -> CommitteeResult<ChangeEvents> {
    let mut events = ChangeEvents::default();
    for key in keys {
        let fingerprint = key.fingerprint();
        match state.locate(fingerprint) {
            Some(list) if list.is_candidate_pool() => {
                state.remove_from(list, fingerprint)?;
                state.staker_info.remove(fingerprint);
                events.stop_auto_stake.push(fingerprint.clone());
            }
            Some(_) => {
                if let Some(info) = state.staker_info.get_mut(fingerprint) {
                    if info.auto_stake {
                        info.auto_stake = false;
                        events.stop_auto_stake.push(fingerprint.clone());
                    }
                }
            }
            None => {
                state.staker_info.remove(fingerprint);
            }
        }
    }
    Ok(events)
}

fn apply_unstake(
    state: &mut CommitteeState,
    keys: &[ValidatorKey],
    slashed_in_batch: &HashSet<Fingerprint>,
) -> CommitteeResult<ChangeEvents> {
    for key in keys {
        let fingerprint = key.fingerprint();
        if slashed_in_batch.contains(fingerprint) {
            debug!(validator = %fingerprint.short(), "[committee] Ignoring unstake of slashed key");
            continue;
        }
        match state.staker_info.get_mut(fingerprint) {
            None => {}
            Some(info) if info.fixed_node => {
                warn!(validator = %fingerprint.short(), "[committee] Fixed node cannot unstake");
            }
            Some(info) => {
                info.unstake_requested = true;
                info.auto_stake = false;
            }
        }
    }
    Ok(ChangeEvents::default())
}

/// Boundary removal of unstaking validators from `chain`'s substitute and,
/// while the committee stays at its minimum, its committee.
fn remove_unstaking(
    state: &mut CommitteeState,
    params: &CommitteeParams,
    chain: ChainId,
    is_bootstrap: bool,
) -> CommitteeResult<Vec<Fingerprint>> {
    let mut removed = Vec::new();

    let substitute = unstaking_in(state, ListId::substitute_of(chain));
    for fingerprint in substitute {
        state.remove_from(ListId::substitute_of(chain), &fingerprint)?;
        state.staker_info.remove(&fingerprint);
        removed.push(fingerprint);
    }

    let (min, _) = committee_bounds(params, chain);
    let committee = unstaking_in(state, ListId::committee_of(chain));
    for fingerprint in committee {
        if !is_bootstrap && state.committee(chain).len() <= min {
            debug!(
                validator = %fingerprint.short(),
                chain = %chain,
                "[committee] Unstake deferred, committee at minimum size"
            );
            break;
        }
        state.remove_from(ListId::committee_of(chain), &fingerprint)?;
        state.staker_info.remove(&fingerprint);
        removed.push(fingerprint);
    }
    Ok(removed)
}

fn unstaking_in(state: &CommitteeState, list: ListId) -> Vec<Fingerprint> {
    state
        .list(list)
        .iter()
        .filter(|key| {
            state
                .staker_info
                .get(key.fingerprint())
                .map_or(false, |info| info.unstake_requested && !info.fixed_node)
        })
        .map(|key| key.fingerprint().clone())
        .collect()
}

fn compute_swap(state: &CommitteeState, env: &ProcessEnv, chain: ChainId) -> SwapOutcome {
    let (min, max) = committee_bounds(&env.params, chain);
    let input = SwapInput {
        committee: state.committee(chain),
        substitute: state.substitute(chain),
        stakers: &state.staker_info,
        max_committee_size: max,
        min_committee_size: min,
        max_swap_out_percent: env.params.max_swap_out_percent,
        max_swap_in_percent: env.params.max_swap_in_percent,
        slashing_threshold: env.params.slashing_threshold,
        default_performing: env.params.default_performing,
    };
    env.swap_rule.apply(&input)
}

fn fingerprints(keys: &[ValidatorKey]) -> Vec<&Fingerprint> {
    keys.iter().map(ValidatorKey::fingerprint).collect()
}

fn apply_swap(
    state: &mut CommitteeState,
    env: &ProcessEnv,
    swap: &SwapInstruction,
) -> CommitteeResult<ChangeEvents> {
    if env.is_random_time || env.is_rekey_breakpoint {
        return Err(rejected("swap not allowed at random time or rekey breakpoint"));
    }
    check_chain(state, swap.chain)?;

    let mut events = ChangeEvents::default();
    events.unstaked = remove_unstaking(state, &env.params, swap.chain, env.is_bootstrap)?;

    let outcome = compute_swap(state, env, swap.chain);
    let listed = !(swap.in_keys.is_empty() && swap.out_keys.is_empty());
    if listed
        && (fingerprints(&swap.in_keys) != fingerprints(&outcome.swapped_in)
            || fingerprints(&swap.out_keys) != fingerprints(&outcome.swapped_out))
    {
        return Err(rejected(format!(
            "swap for {} does not match rule {:?}",
            swap.chain, env.swap_rule
        )));
    }

    let SwapOutcome {
        committee,
        swapped_in,
        swapped_out,
        slashed,
    } = outcome;
    *state.list_mut(ListId::committee_of(swap.chain))? = committee;

    let in_set: HashSet<&Fingerprint> = swapped_in.iter().map(|k| k.fingerprint()).collect();
    state
        .list_mut(ListId::substitute_of(swap.chain))?
        .retain(|key| !in_set.contains(key.fingerprint()));

    for key in &slashed {
        state.staker_info.remove(key.fingerprint());
        events.slashed.push(key.fingerprint().clone());
    }
    demote(state, swap.chain, &swapped_out, &mut events)?;
    promote(state, env, swap.chain, &swapped_in, &mut events);

    if !events.is_empty() {
        debug!(
            chain = %swap.chain,
            swapped_in = events.swapped_in.len(),
            swapped_out = events.swapped_out.len(),
            slashed = events.slashed.len(),
            unstaked = events.unstaked.len(),
            "[committee] Swap applied"
        );
    }
    Ok(events)
}

/// Members leaving a committee rejoin the substitute tail when they
/// auto-stake; otherwise they exit.
fn demote(
    state: &mut CommitteeState,
    chain: ChainId,
    keys: &[ValidatorKey],
    events: &mut ChangeEvents,
) -> CommitteeResult<()> {
    for key in keys {
        let stays = state
            .staker_info
            .get(key.fingerprint())
            .map_or(false, |info| info.auto_stake && !info.unstake_requested);
        if stays {
            state.list_mut(ListId::substitute_of(chain))?.push(key.clone());
        } else {
            state.staker_info.remove(key.fingerprint());
        }
        events.swapped_out.push(key.fingerprint().clone());
    }
    Ok(())
}

fn promote(
    state: &mut CommitteeState,
    env: &ProcessEnv,
    chain: ChainId,
    keys: &[ValidatorKey],
    events: &mut ChangeEvents,
) {
    for key in keys {
        if let Some(info) = state.staker_info.get_mut(key.fingerprint()) {
            info.performance = env.params.default_performing;
            info.shard_hint = chain.shard_id();
        }
        events.swapped_in.push(key.fingerprint().clone());
    }
}

fn apply_replace(
    state: &mut CommitteeState,
    env: &ProcessEnv,
    swap: &SwapInstruction,
) -> CommitteeResult<ChangeEvents> {
    check_chain(state, swap.chain)?;
    let committee_id = ListId::committee_of(swap.chain);
    let substitute_id = ListId::substitute_of(swap.chain);

    for (incoming, outgoing) in swap.in_keys.iter().zip(&swap.out_keys) {
        if !state.list(substitute_id).contains(incoming) {
            return Err(rejected(format!(
                "{} is not a substitute of {}",
                incoming.fingerprint().short(),
                swap.chain
            )));
        }
        if !state.list(committee_id).contains(outgoing) {
            return Err(rejected(format!(
                "{} is not in the {} committee",
                outgoing.fingerprint().short(),
                swap.chain
            )));
        }
        if state
            .staker_info
            .get(outgoing.fingerprint())
            .map_or(false, |info| info.fixed_node)
        {
            return Err(rejected(format!(
                "fixed node {} cannot be replaced",
                outgoing.fingerprint().short()
            )));
        }
    }

    for (incoming, outgoing) in swap.in_keys.iter().zip(&swap.out_keys) {
        state.remove_from(substitute_id, incoming.fingerprint())?;
        let committee = state.list_mut(committee_id)?;
        if let Some(slot) = committee.iter_mut().find(|key| *key == outgoing) {
            *slot = incoming.clone();
        }
    }

    let mut events = ChangeEvents::default();
    demote(state, swap.chain, &swap.out_keys, &mut events)?;
    promote(state, env, swap.chain, &swap.in_keys, &mut events);
    Ok(events)
}

fn substitute_sizes(state: &CommitteeState) -> Vec<usize> {
    state.shard_ids().map(|sid| state.shard_substitute(sid).len()).collect()
}

fn compute_assignment(state: &CommitteeState, params: &CommitteeParams) -> Assignment {
    assign_candidates(
        &state.candidates_current_random,
        &substitute_sizes(state),
        state.scalars.random_number,
        params.assign_offset,
    )
}

fn place(state: &mut CommitteeState, key: &ValidatorKey, sid: u8) -> CommitteeResult<()> {
    state.remove_from(ListId::CurrentCandidates, key.fingerprint())?;
    state.list_mut(ListId::ShardSubstitute(sid))?.push(key.clone());
    if let Some(info) = state.staker_info.get_mut(key.fingerprint()) {
        info.shard_hint = Some(sid);
    }
    Ok(())
}

fn apply_random(
    state: &mut CommitteeState,
    env: &ProcessEnv,
    random: &RandomInstruction,
) -> CommitteeResult<ChangeEvents> {
    if !env.is_random_time {
        return Err(rejected("random outside random time"));
    }
    if state.scalars.random_flag {
        return Err(rejected(format!(
            "random already applied in epoch {}",
            state.scalars.epoch
        )));
    }
    if state.candidates_next_random.is_empty() && state.candidates_current_random.is_empty() {
        debug!(random = random.number, "[committee] No candidates to assign");
        return Ok(ChangeEvents::default());
    }
    state.scalars.random_number = random.number;
    state.scalars.random_flag = true;

    let mut events = ChangeEvents::default();
    let next = std::mem::take(&mut state.candidates_next_random);
    for key in next {
        let leaving = state
            .staker_info
            .get(key.fingerprint())
            .map_or(false, |info| info.unstake_requested);
        if leaving {
            state.staker_info.remove(key.fingerprint());
            events.unstaked.push(key.fingerprint().clone());
        } else {
            state.candidates_current_random.push(key);
        }
    }

    if state.candidates_current_random.is_empty() {
        return Ok(events);
    }

    let Assignment { assigned, leftover } = compute_assignment(state, &env.params);
    for (key, sid) in &assigned {
        place(state, key, *sid)?;
    }
    for key in leftover {
        state.remove_from(ListId::CurrentCandidates, key.fingerprint())?;
        state.candidates_next_random.push(key);
    }
    debug!(
        random = random.number,
        assigned = assigned.len(),
        carried = state.candidates_next_random.len(),
        "[committee] Candidates assigned"
    );
    Ok(events)
}

fn apply_assign(
    state: &mut CommitteeState,
    env: &ProcessEnv,
    pairs: &[(ValidatorKey, u8)],
) -> CommitteeResult<ChangeEvents> {
    if !state.scalars.random_flag {
        return Err(rejected("assign before the epoch's random number"));
    }
    let expected = compute_assignment(state, &env.params);
    for pair in pairs {
        if !expected.assigned.contains(pair) {
            return Err(rejected(format!(
                "assignment of {} to shard {} does not match",
                pair.0.fingerprint().short(),
                pair.1
            )));
        }
    }
    for (key, sid) in pairs {
        place(state, key, *sid)?;
    }
    Ok(ChangeEvents::default())
}

fn apply_slashing(
    state: &mut CommitteeState,
    env: &ProcessEnv,
    keys: &[ValidatorKey],
) -> CommitteeResult<ChangeEvents> {
    let mut events = ChangeEvents::default();
    for key in keys {
        let fingerprint = key.fingerprint();
        let list = match state.locate(fingerprint) {
            Some(list) if list.is_committee() => list,
            _ => {
                debug!(validator = %fingerprint.short(), "[committee] Slashing target not in a committee");
                continue;
            }
        };
        if state
            .staker_info
            .get(fingerprint)
            .map_or(false, |info| info.fixed_node)
        {
            warn!(validator = %fingerprint.short(), "[committee] Fixed node cannot be slashed");
            continue;
        }
        let Some(chain) = list.chain() else { continue };
        let (min, _) = committee_bounds(&env.params, chain);
        if !env.is_bootstrap && state.list(list).len() <= min {
            warn!(
                validator = %fingerprint.short(),
                chain = %chain,
                "[committee] Slashing skipped, committee at minimum size"
            );
            continue;
        }
        state.remove_from(list, fingerprint)?;
        state.staker_info.remove(fingerprint);
        events.slashed.push(fingerprint.clone());
    }
    Ok(events)
}
