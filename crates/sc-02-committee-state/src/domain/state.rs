//! # Committee State
//!
//! The authoritative snapshot of every committee, substitute list and
//! candidate pool, plus staker attributes and epoch scalars.
//!
//! Readers only ever see whole snapshots. Updates go through
//! `clone()` + [`crate::InstructionProcessor::process_batch`] and are
//! published by [`crate::CommitteeStateStore`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use shared_types::{committee_hash, finalize, ChainId, Fingerprint, Hash, ShardId, ValidatorKey};

use super::errors::{CommitteeError, CommitteeResult};
use super::params::CommitteeParams;
use super::staker::StakerInfo;

/// Names one ordered list inside a [`CommitteeState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ListId {
    BeaconCommittee,
    BeaconSubstitute,
    ShardCommittee(ShardId),
    ShardSubstitute(ShardId),
    CurrentCandidates,
    NextCandidates,
}

impl ListId {
    pub fn committee_of(chain: ChainId) -> Self {
        match chain {
            ChainId::Beacon => ListId::BeaconCommittee,
            ChainId::Shard(sid) => ListId::ShardCommittee(sid),
        }
    }

    pub fn substitute_of(chain: ChainId) -> Self {
        match chain {
            ChainId::Beacon => ListId::BeaconSubstitute,
            ChainId::Shard(sid) => ListId::ShardSubstitute(sid),
        }
    }

    /// Chain this list belongs to; candidate pools belong to none.
    pub fn chain(&self) -> Option<ChainId> {
        match self {
            ListId::BeaconCommittee | ListId::BeaconSubstitute => Some(ChainId::Beacon),
            ListId::ShardCommittee(sid) | ListId::ShardSubstitute(sid) => Some(ChainId::Shard(*sid)),
            ListId::CurrentCandidates | ListId::NextCandidates => None,
        }
    }

    pub fn is_committee(&self) -> bool {
        matches!(self, ListId::BeaconCommittee | ListId::ShardCommittee(_))
    }

    pub fn is_candidate_pool(&self) -> bool {
        matches!(self, ListId::CurrentCandidates | ListId::NextCandidates)
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListId::BeaconCommittee => write!(f, "beacon-committee"),
            ListId::BeaconSubstitute => write!(f, "beacon-substitute"),
            ListId::ShardCommittee(sid) => write!(f, "shard-{}-committee", sid),
            ListId::ShardSubstitute(sid) => write!(f, "shard-{}-substitute", sid),
            ListId::CurrentCandidates => write!(f, "candidates-current"),
            ListId::NextCandidates => write!(f, "candidates-next"),
        }
    }
}

/// Where a validator currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidatorRole {
    Committee(ChainId),
    Substitute(ChainId),
    /// Waiting for a random number; `current` is true once moved into the
    /// current-random pool.
    Candidate { current: bool },
}

impl From<ListId> for ValidatorRole {
    fn from(list: ListId) -> Self {
        match list {
            ListId::BeaconCommittee => ValidatorRole::Committee(ChainId::Beacon),
            ListId::BeaconSubstitute => ValidatorRole::Substitute(ChainId::Beacon),
            ListId::ShardCommittee(sid) => ValidatorRole::Committee(ChainId::Shard(sid)),
            ListId::ShardSubstitute(sid) => ValidatorRole::Substitute(ChainId::Shard(sid)),
            ListId::CurrentCandidates => ValidatorRole::Candidate { current: true },
            ListId::NextCandidates => ValidatorRole::Candidate { current: false },
        }
    }
}

/// Committee-hash commitments carried by beacon headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeCommitments {
    pub beacon_committee: Hash,
    pub beacon_substitute: Hash,
    pub shard_committees: Hash,
    pub shard_substitutes: Hash,
    pub candidates: Hash,
    pub auto_stake: Hash,
}

impl CommitteeCommitments {
    pub fn root(&self) -> Hash {
        let mut hasher = Keccak256::new();
        hasher.update(self.beacon_committee);
        hasher.update(self.beacon_substitute);
        hasher.update(self.shard_committees);
        hasher.update(self.shard_substitutes);
        hasher.update(self.candidates);
        hasher.update(self.auto_stake);
        finalize(hasher)
    }
}

/// Scalar fields of the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochScalars {
    pub epoch: u64,
    pub height: u64,
    pub random_number: u64,
    pub random_flag: bool,
    pub is_random_time: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeState {
    pub(crate) active_shards: u16,
    pub(crate) beacon_committee: Vec<ValidatorKey>,
    pub(crate) beacon_substitute: Vec<ValidatorKey>,
    pub(crate) shard_committee: BTreeMap<ShardId, Vec<ValidatorKey>>,
    pub(crate) shard_substitute: BTreeMap<ShardId, Vec<ValidatorKey>>,
    pub(crate) candidates_current_random: Vec<ValidatorKey>,
    pub(crate) candidates_next_random: Vec<ValidatorKey>,
    pub(crate) staker_info: BTreeMap<Fingerprint, StakerInfo>,
    pub(crate) scalars: EpochScalars,
}

impl CommitteeState {
    /// Empty state with one (empty) committee and substitute per shard.
    pub fn new(active_shards: u16) -> Self {
        let shards: Vec<ShardId> = (0..active_shards.min(256)).map(|sid| sid as ShardId).collect();
        Self {
            active_shards,
            beacon_committee: Vec::new(),
            beacon_substitute: Vec::new(),
            shard_committee: shards.iter().map(|sid| (*sid, Vec::new())).collect(),
            shard_substitute: shards.iter().map(|sid| (*sid, Vec::new())).collect(),
            candidates_current_random: Vec::new(),
            candidates_next_random: Vec::new(),
            staker_info: BTreeMap::new(),
            scalars: EpochScalars {
                epoch: 1,
                height: 0,
                random_number: 0,
                random_flag: false,
                is_random_time: false,
            },
        }
    }

    pub fn builder(active_shards: u16) -> CommitteeStateBuilder {
        CommitteeStateBuilder {
            state: Self::new(active_shards),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn active_shards(&self) -> u16 {
        self.active_shards
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = ShardId> + '_ {
        self.shard_committee.keys().copied()
    }

    pub fn beacon_committee(&self) -> &[ValidatorKey] {
        &self.beacon_committee
    }

    pub fn beacon_substitute(&self) -> &[ValidatorKey] {
        &self.beacon_substitute
    }

    pub fn shard_committee(&self, sid: ShardId) -> &[ValidatorKey] {
        self.shard_committee.get(&sid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn shard_substitute(&self, sid: ShardId) -> &[ValidatorKey] {
        self.shard_substitute.get(&sid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn committee(&self, chain: ChainId) -> &[ValidatorKey] {
        self.list(ListId::committee_of(chain))
    }

    pub fn substitute(&self, chain: ChainId) -> &[ValidatorKey] {
        self.list(ListId::substitute_of(chain))
    }

    pub fn candidates_current_random(&self) -> &[ValidatorKey] {
        &self.candidates_current_random
    }

    pub fn candidates_next_random(&self) -> &[ValidatorKey] {
        &self.candidates_next_random
    }

    pub fn staker_info(&self, fingerprint: &Fingerprint) -> Option<&StakerInfo> {
        self.staker_info.get(fingerprint)
    }

    pub fn stakers(&self) -> &BTreeMap<Fingerprint, StakerInfo> {
        &self.staker_info
    }

    pub fn scalars(&self) -> EpochScalars {
        self.scalars
    }

    pub fn epoch(&self) -> u64 {
        self.scalars.epoch
    }

    pub fn height(&self) -> u64 {
        self.scalars.height
    }

    pub fn random_number(&self) -> u64 {
        self.scalars.random_number
    }

    pub fn random_flag(&self) -> bool {
        self.scalars.random_flag
    }

    pub fn is_random_time(&self) -> bool {
        self.scalars.is_random_time
    }

    /// Every list id in canonical order.
    pub fn list_ids(&self) -> Vec<ListId> {
        let mut ids = vec![ListId::BeaconCommittee, ListId::BeaconSubstitute];
        for sid in self.shard_ids() {
            ids.push(ListId::ShardCommittee(sid));
            ids.push(ListId::ShardSubstitute(sid));
        }
        ids.push(ListId::CurrentCandidates);
        ids.push(ListId::NextCandidates);
        ids
    }

    pub fn list(&self, id: ListId) -> &[ValidatorKey] {
        match id {
            ListId::BeaconCommittee => &self.beacon_committee,
            ListId::BeaconSubstitute => &self.beacon_substitute,
            ListId::ShardCommittee(sid) => self.shard_committee(sid),
            ListId::ShardSubstitute(sid) => self.shard_substitute(sid),
            ListId::CurrentCandidates => &self.candidates_current_random,
            ListId::NextCandidates => &self.candidates_next_random,
        }
    }

    pub(crate) fn list_mut(&mut self, id: ListId) -> CommitteeResult<&mut Vec<ValidatorKey>> {
        match id {
            ListId::BeaconCommittee => Ok(&mut self.beacon_committee),
            ListId::BeaconSubstitute => Ok(&mut self.beacon_substitute),
            ListId::ShardCommittee(sid) => self
                .shard_committee
                .get_mut(&sid)
                .ok_or(CommitteeError::UnknownShard(sid)),
            ListId::ShardSubstitute(sid) => self
                .shard_substitute
                .get_mut(&sid)
                .ok_or(CommitteeError::UnknownShard(sid)),
            ListId::CurrentCandidates => Ok(&mut self.candidates_current_random),
            ListId::NextCandidates => Ok(&mut self.candidates_next_random),
        }
    }

    /// The list holding `fingerprint`, if any.
    pub fn locate(&self, fingerprint: &Fingerprint) -> Option<ListId> {
        self.list_ids().into_iter().find(|id| {
            self.list(*id)
                .iter()
                .any(|key| key.fingerprint() == fingerprint)
        })
    }

    pub fn role_of(&self, fingerprint: &Fingerprint) -> Option<ValidatorRole> {
        self.locate(fingerprint).map(ValidatorRole::from)
    }

    /// Remove `fingerprint` from `list`; returns the removed key.
    pub(crate) fn remove_from(
        &mut self,
        list: ListId,
        fingerprint: &Fingerprint,
    ) -> CommitteeResult<Option<ValidatorKey>> {
        let keys = self.list_mut(list)?;
        Ok(keys
            .iter()
            .position(|key| key.fingerprint() == fingerprint)
            .map(|pos| keys.remove(pos)))
    }

    // -------------------------------------------------------------------------
    // Invariants
    // -------------------------------------------------------------------------

    /// Checks that hold for every snapshot regardless of parameters:
    /// uniqueness across lists, staker coverage, fixed nodes first.
    pub fn check_structure(&self) -> CommitteeResult<()> {
        let mut seen: HashSet<&Fingerprint> = HashSet::new();
        for id in self.list_ids() {
            for key in self.list(id) {
                let fingerprint = key.fingerprint();
                if !seen.insert(fingerprint) {
                    return Err(CommitteeError::InvariantViolation(format!(
                        "{} appears in more than one list (again in {})",
                        fingerprint.short(),
                        id
                    )));
                }
                if !self.staker_info.contains_key(fingerprint) {
                    return Err(CommitteeError::InvariantViolation(format!(
                        "{} in {} has no staker info",
                        fingerprint.short(),
                        id
                    )));
                }
            }
        }

        for id in self.list_ids().into_iter().filter(ListId::is_committee) {
            let mut seen_regular = false;
            for key in self.list(id) {
                let fixed = self
                    .staker_info
                    .get(key.fingerprint())
                    .map_or(false, |info| info.fixed_node);
                if fixed && seen_regular {
                    return Err(CommitteeError::InvariantViolation(format!(
                        "fixed node {} is not at the front of {}",
                        key.fingerprint().short(),
                        id
                    )));
                }
                seen_regular |= !fixed;
            }
        }

        let expected_shards = usize::from(self.active_shards.min(256));
        if self.shard_committee.len() != expected_shards
            || self.shard_substitute.len() != expected_shards
        {
            return Err(CommitteeError::InvariantViolation(format!(
                "expected {} shards, found {} committees and {} substitutes",
                expected_shards,
                self.shard_committee.len(),
                self.shard_substitute.len()
            )));
        }
        Ok(())
    }

    /// Full post-instruction check, including committee sizes.
    pub fn check_invariants(&self, params: &CommitteeParams, is_bootstrap: bool) -> CommitteeResult<()> {
        self.check_structure()?;

        if self.beacon_committee.len() > params.max_beacon_committee_size {
            return Err(CommitteeError::InvariantViolation(format!(
                "beacon committee has {} members, max {}",
                self.beacon_committee.len(),
                params.max_beacon_committee_size
            )));
        }

        for (sid, committee) in &self.shard_committee {
            if committee.len() > params.max_shard_committee_size {
                return Err(CommitteeError::InvariantViolation(format!(
                    "shard {} committee has {} members, max {}",
                    sid,
                    committee.len(),
                    params.max_shard_committee_size
                )));
            }
            if !is_bootstrap && committee.len() < params.min_shard_committee_size {
                return Err(CommitteeError::InvariantViolation(format!(
                    "shard {} committee has {} members, min {}",
                    sid,
                    committee.len(),
                    params.min_shard_committee_size
                )));
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Commitments
    // -------------------------------------------------------------------------

    pub fn commitments(&self) -> CommitteeCommitments {
        let per_shard = |lists: &BTreeMap<ShardId, Vec<ValidatorKey>>| {
            let mut hasher = Keccak256::new();
            for (sid, keys) in lists {
                hasher.update([*sid]);
                hasher.update(committee_hash(keys));
            }
            finalize(hasher)
        };

        let mut candidates = Keccak256::new();
        candidates.update(committee_hash(&self.candidates_current_random));
        candidates.update(committee_hash(&self.candidates_next_random));

        let mut auto_stake = Keccak256::new();
        for (fingerprint, info) in &self.staker_info {
            auto_stake.update(fingerprint.as_str().as_bytes());
            auto_stake.update([u8::from(info.auto_stake)]);
        }

        CommitteeCommitments {
            beacon_committee: committee_hash(&self.beacon_committee),
            beacon_substitute: committee_hash(&self.beacon_substitute),
            shard_committees: per_shard(&self.shard_committee),
            shard_substitutes: per_shard(&self.shard_substitute),
            candidates: finalize(candidates),
            auto_stake: finalize(auto_stake),
        }
    }
}

/// Assembles a genesis (or test) snapshot.
#[derive(Debug, Clone)]
pub struct CommitteeStateBuilder {
    state: CommitteeState,
}

impl CommitteeStateBuilder {
    fn push(mut self, list: ListId, key: ValidatorKey, info: StakerInfo) -> Self {
        self.state
            .staker_info
            .insert(key.fingerprint().clone(), info);
        match list {
            ListId::ShardCommittee(sid) => {
                self.state.shard_committee.entry(sid).or_default().push(key)
            }
            ListId::ShardSubstitute(sid) => {
                self.state.shard_substitute.entry(sid).or_default().push(key)
            }
            // Non-shard lists always exist.
            other => {
                if let Ok(keys) = self.state.list_mut(other) {
                    keys.push(key);
                }
            }
        }
        self
    }

    pub fn beacon_committee(self, key: ValidatorKey, info: StakerInfo) -> Self {
        self.push(ListId::BeaconCommittee, key, info)
    }

    pub fn beacon_substitute(self, key: ValidatorKey, info: StakerInfo) -> Self {
        self.push(ListId::BeaconSubstitute, key, info)
    }

    pub fn shard_committee(self, sid: ShardId, key: ValidatorKey, info: StakerInfo) -> Self {
        self.push(ListId::ShardCommittee(sid), key, info)
    }

    pub fn shard_substitute(self, sid: ShardId, key: ValidatorKey, info: StakerInfo) -> Self {
        self.push(ListId::ShardSubstitute(sid), key, info)
    }

    pub fn current_candidate(self, key: ValidatorKey, info: StakerInfo) -> Self {
        self.push(ListId::CurrentCandidates, key, info)
    }

    pub fn next_candidate(self, key: ValidatorKey, info: StakerInfo) -> Self {
        self.push(ListId::NextCandidates, key, info)
    }

    pub fn epoch(mut self, epoch: u64) -> Self {
        self.state.scalars.epoch = epoch;
        self
    }

    pub fn height(mut self, height: u64) -> Self {
        self.state.scalars.height = height;
        self
    }

    pub fn random_number(mut self, number: u64) -> Self {
        self.state.scalars.random_number = number;
        self
    }

    /// Fails if a key was added twice or a shard id is out of range.
    pub fn build(self) -> CommitteeResult<CommitteeState> {
        let active = self.state.active_shards.min(256);
        if let Some(sid) = self
            .state
            .shard_committee
            .keys()
            .chain(self.state.shard_substitute.keys())
            .find(|sid| u16::from(**sid) >= active)
        {
            return Err(CommitteeError::UnknownShard(*sid));
        }
        self.state.check_structure()?;
        Ok(self.state)
    }
}
