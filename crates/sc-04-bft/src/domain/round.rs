//! Per-round state: the phase and the vote accumulator for the proposal
//! under consideration.

use std::collections::BTreeMap;

use sc_01_signature_aggregation::{quorum_threshold, PartialSig};
use shared_types::{Block, Fingerprint, Hash, ValidatorKey, VoteMsg};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the round's proposal.
    Listen,
    /// Building and broadcasting our own proposal.
    Propose,
    /// Proposal admitted, pre-sign validation pending.
    Vote,
    /// Collecting votes.
    Commit,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Listen => "listen",
            Phase::Propose => "propose",
            Phase::Vote => "vote",
            Phase::Commit => "commit",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoteRecord {
    pub vote: VoteMsg,
    /// Position in the signing committee.
    pub index: usize,
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Counted,
    /// A valid vote replaced an earlier invalid one.
    Replaced,
    /// The validator already has a valid vote. Nothing changed.
    Duplicate,
    Rejected,
}

/// Accumulator for one proposal.
#[derive(Debug, Clone)]
pub struct ProposeBlockInfo {
    pub block: Block,
    pub hash: Hash,
    /// Rotation committee the proposer was checked against.
    pub committee: Vec<ValidatorKey>,
    /// Committee whose votes finalise the block.
    pub signing_committee: Vec<ValidatorKey>,
    /// Our position in `signing_committee`, if we sign.
    pub local_index: Option<usize>,
    pub is_valid: bool,
    pub has_new_vote: bool,
    pub valid_votes: usize,
    pub err_votes: usize,
    votes: BTreeMap<Fingerprint, VoteRecord>,
}

impl ProposeBlockInfo {
    pub fn new(
        block: Block,
        committee: Vec<ValidatorKey>,
        signing_committee: Vec<ValidatorKey>,
        local_index: Option<usize>,
    ) -> Self {
        let hash = block.hash();
        Self {
            block,
            hash,
            committee,
            signing_committee,
            local_index,
            is_valid: false,
            has_new_vote: false,
            valid_votes: 0,
            err_votes: 0,
            votes: BTreeMap::new(),
        }
    }

    pub fn index_of(&self, validator: &Fingerprint) -> Option<usize> {
        self.signing_committee
            .iter()
            .position(|key| key.fingerprint() == validator)
    }

    /// False once the validator has a valid vote on record.
    pub fn needs_verification(&self, validator: &Fingerprint) -> bool {
        !self.votes.get(validator).is_some_and(|record| record.valid)
    }

    /// Store a vote whose signature was already checked.
    pub fn record(&mut self, vote: VoteMsg, index: usize, valid: bool) -> VoteOutcome {
        let outcome = match self.votes.get(&vote.validator) {
            Some(existing) if existing.valid => return VoteOutcome::Duplicate,
            Some(_) if valid => {
                self.err_votes = self.err_votes.saturating_sub(1);
                self.valid_votes += 1;
                VoteOutcome::Replaced
            }
            Some(_) => return VoteOutcome::Rejected,
            None if valid => {
                self.valid_votes += 1;
                VoteOutcome::Counted
            }
            None => {
                self.err_votes += 1;
                VoteOutcome::Rejected
            }
        };
        if valid {
            self.has_new_vote = true;
        }
        self.votes
            .insert(vote.validator.clone(), VoteRecord { vote, index, valid });
        outcome
    }

    /// Count a vote that failed before a committee index was known.
    pub fn record_error(&mut self) {
        self.err_votes += 1;
    }

    pub fn vote_of(&self, validator: &Fingerprint) -> Option<&VoteRecord> {
        self.votes.get(validator)
    }

    pub fn required_votes(&self) -> usize {
        quorum_threshold(self.signing_committee.len())
    }

    pub fn has_quorum(&self) -> bool {
        self.valid_votes >= self.required_votes()
    }

    /// Valid partial signatures by committee index, ascending.
    pub fn valid_signatures(&self) -> Vec<(usize, PartialSig)> {
        let mut sigs: Vec<(usize, PartialSig)> = self
            .votes
            .values()
            .filter(|record| record.valid)
            .filter_map(|record| {
                PartialSig::from_slice(&record.vote.partial_signature).map(|sig| (record.index, sig))
            })
            .collect();
        sigs.sort_by_key(|(index, _)| *index);
        sigs
    }

    /// Bridge signatures of valid votes, keyed by committee index.
    pub fn bridge_signatures(&self) -> Vec<(u32, Vec<u8>)> {
        let mut sigs: Vec<(u32, Vec<u8>)> = self
            .votes
            .values()
            .filter(|record| record.valid)
            .filter_map(|record| {
                let sig = record.vote.bridge_signature.clone()?;
                Some((u32::try_from(record.index).ok()?, sig))
            })
            .collect();
        sigs.sort_by_key(|(index, _)| *index);
        sigs
    }
}
