//! # BFT Driver
//!
//! Single-task round driver for one chain.
//!
//! ```text
//!            block ready
//!   ┌──────────────────────► PROPOSE ── broadcast ProposeMsg ──┐
//!   │                                                           ▼
//! start ──► LISTEN ── valid propose ──► VOTE ── send VoteMsg ──► COMMIT ──► finalised
//!              ▲                                                  │
//!              └──────── timeout / stale view / bad propose ──────┘
//! ```
//!
//! The round number is derived from the clock and the chain view, so a
//! timeout is simply the next tick computing a higher round. Every state
//! change happens on the driver's own task, in inbox order.

use std::sync::Arc;

use sc_01_signature_aggregation::{
    AggregationError, MultiSignature, PartialSig, SignatureAggregator, ValidatorSecrets,
};
use shared_bus::{EventPublisher, NodeEvent};
use shared_types::{
    committee_hash, hex_short, Block, ChainId, Hash, ProposeMsg, ValidatorKey, VoteMsg, WireMessage,
};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::inbox::{DriverInput, Inbox, PushOutcome};
use crate::domain::{
    BftConfig, BlockRequest, ChainError, ChainView, ConsensusError, ConsensusResult, EarlyVoteBuffer,
    Phase, ProposeBlockInfo, VoteOutcome,
};
use crate::metrics;
use crate::ports::{ChainCollaborator, Clock, ConsensusNetwork, SystemClock};

struct RoundState {
    view: ChainView,
    height: u64,
    round: u32,
    phase: Phase,
    started_at: Instant,
    proposed: bool,
    finalized: bool,
    /// Hash of a proposal the chain refused this round.
    rejected: Option<Hash>,
    proposal: Option<ProposeBlockInfo>,
    own_propose: Option<ProposeMsg>,
    local_vote: Option<VoteMsg>,
}

impl RoundState {
    fn new(view: ChainView, height: u64, round: u32) -> Self {
        Self {
            view,
            height,
            round,
            phase: Phase::Listen,
            started_at: Instant::now(),
            proposed: false,
            finalized: false,
            rejected: None,
            proposal: None,
            own_propose: None,
            local_vote: None,
        }
    }
}

pub struct BftDriver<C, N>
where
    C: ChainCollaborator + 'static,
    N: ConsensusNetwork + 'static,
{
    config: BftConfig,
    chain_id: ChainId,
    chain: Arc<C>,
    network: Arc<N>,
    clock: Arc<dyn Clock>,
    aggregator: SignatureAggregator,
    secrets: Option<ValidatorSecrets>,
    local_key: Option<ValidatorKey>,
    bus: Option<Arc<dyn EventPublisher>>,
    inbox: Arc<Inbox>,
    round: Option<RoundState>,
    early_votes: EarlyVoteBuffer,
    advance_pending: bool,
}

impl<C, N> BftDriver<C, N>
where
    C: ChainCollaborator + 'static,
    N: ConsensusNetwork + 'static,
{
    pub fn new(config: BftConfig, chain_id: ChainId, chain: Arc<C>, network: Arc<N>) -> ConsensusResult<Self> {
        config.validate()?;
        let inbox = Arc::new(Inbox::new(config.inbox_capacity));
        let early_votes = EarlyVoteBuffer::new(config.inbox_capacity);
        Ok(Self {
            config,
            chain_id,
            chain,
            network,
            clock: Arc::new(SystemClock),
            aggregator: SignatureAggregator::new(),
            secrets: None,
            local_key: None,
            bus: None,
            inbox,
            round: None,
            early_votes,
            advance_pending: false,
        })
    }

    /// Sign and propose with these keys when they are in the committee.
    pub fn with_identity(mut self, secrets: ValidatorSecrets) -> ConsensusResult<Self> {
        self.local_key = Some(secrets.validator_key()?);
        self.secrets = Some(secrets);
        Ok(self)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<dyn EventPublisher>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn phase(&self) -> Option<Phase> {
        self.round.as_ref().map(|state| state.phase)
    }

    pub fn height_round(&self) -> Option<(u64, u32)> {
        self.round.as_ref().map(|state| (state.height, state.round))
    }

    /// `(valid_votes, err_votes)` of the current proposal.
    pub fn tally(&self) -> Option<(usize, usize)> {
        self.round
            .as_ref()
            .and_then(|state| state.proposal.as_ref())
            .map(|proposal| (proposal.valid_votes, proposal.err_votes))
    }

    pub fn buffered_votes(&self) -> usize {
        self.early_votes.len()
    }

    /// Read the chain view and enter the first round.
    pub async fn start(&mut self) {
        info!(
            chain = %self.chain_id,
            validator = %self.local_key.as_ref().map_or("-", |key| key.fingerprint().short()),
            "[bft] Driver started"
        );
        self.publish(NodeEvent::DriverLifecycle {
            chain: self.chain_id,
            running: true,
        })
        .await;
        self.refresh(true).await;
        self.settle().await;
    }

    pub async fn handle(&mut self, input: DriverInput) {
        match input {
            DriverInput::Propose(msg) => self.on_propose(msg).await,
            DriverInput::Vote(vote) => self.on_vote(vote).await,
            DriverInput::Timer => {
                self.on_tick().await;
                return;
            }
            DriverInput::ChainAdvanced => self.refresh(false).await,
            DriverInput::CommitteeChanged => self.refresh(true).await,
            DriverInput::Shutdown => {}
        }
        self.settle().await;
    }

    /// Periodic work: follow the clock and the chain, retry sends, purge
    /// early votes.
    pub async fn on_tick(&mut self) {
        self.refresh(false).await;
        self.try_propose().await;
        self.rebroadcast().await;
        self.try_finalize().await;

        if let Some(state) = &self.round {
            let cutoff = self.clock.now_ms().saturating_sub(self.config.round_timeout_ms());
            let dropped = self.early_votes.purge(cutoff, state.height);
            if dropped > 0 {
                debug!(chain = %self.chain_id, dropped, "[bft] Purged early votes");
            }
        }
        self.settle().await;
    }

    pub fn spawn(self) -> DriverHandle {
        let chain = self.chain_id;
        let inbox = Arc::clone(&self.inbox);
        let join = tokio::spawn(self.run());
        DriverHandle { chain, inbox, join }
    }

    async fn run(mut self) {
        self.start().await;
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'run: loop {
            tokio::select! {
                _ = self.inbox.notified() => {
                    while let Some(input) = self.inbox.pop() {
                        if matches!(input, DriverInput::Shutdown) {
                            break 'run;
                        }
                        self.handle(input).await;
                    }
                }
                _ = ticker.tick() => self.on_tick().await,
            }
        }

        self.stop().await;
    }

    async fn stop(&mut self) {
        self.inbox.close();
        while self.inbox.pop().is_some() {}
        // A partial aggregate is discarded with the round.
        let (height, round) = self.height_round().unwrap_or_default();
        self.round = None;
        self.publish(NodeEvent::DriverLifecycle {
            chain: self.chain_id,
            running: false,
        })
        .await;
        info!(chain = %self.chain_id, height, round, "[bft] Driver stopped");
    }

    /// Re-enter rounds until a finalised block no longer moves the tip.
    async fn settle(&mut self) {
        while std::mem::take(&mut self.advance_pending) {
            self.refresh(false).await;
        }
    }

    // =========================================================================
    // ROUND ENTRY
    // =========================================================================

    /// Enter a new round when the chain or the clock moved past the current
    /// one, or unconditionally when `force` is set.
    async fn refresh(&mut self, force: bool) {
        let view = self.chain.view().await;
        let now = self.clock.now_ms();
        let height = view.next_height();
        let round = view.round_at(now, self.config.round_timeout);

        if let Some(current) = &self.round {
            if !force && current.height == height && current.round == round {
                return;
            }
            if current.height != height {
                if let Some(proposal) = &current.proposal {
                    if !current.finalized {
                        info!(
                            chain = %self.chain_id,
                            height = current.height,
                            round = current.round,
                            votes = proposal.valid_votes,
                            "[bft] Stale round cancelled"
                        );
                    }
                }
            } else if round > current.round {
                debug!(
                    chain = %self.chain_id,
                    "[bft] {}",
                    ConsensusError::Timeout { height, round: current.round }
                );
            }
        }

        self.enter_round(view, height, round).await;
    }

    async fn enter_round(&mut self, view: ChainView, height: u64, round: u32) {
        self.inbox.set_current(height, round);
        self.early_votes.purge(i64::MIN, height);
        debug!(
            chain = %self.chain_id,
            height,
            round,
            proposer = %view.proposer_for(round).map_or("-", |key| key.fingerprint().short()),
            committee = view.committee.len(),
            "[bft] Entering round"
        );
        self.round = Some(RoundState::new(view, height, round));
        metrics::record_round_started(&self.chain_id.to_string());
        self.try_propose().await;
    }

    // =========================================================================
    // PROPOSE
    // =========================================================================

    async fn try_propose(&mut self) {
        let now = self.clock.now_ms();
        let Some(local) = self.local_key.as_ref().map(|key| key.fingerprint().clone()) else {
            return;
        };
        let Some(state) = self.round.as_mut() else { return };
        if state.phase != Phase::Listen || state.proposed {
            return;
        }
        let is_proposer = state
            .view
            .proposer_for(state.round)
            .is_some_and(|proposer| *proposer.fingerprint() == local);
        if !is_proposer || !state.view.can_propose_at(now) {
            return;
        }

        state.proposed = true;
        state.phase = Phase::Propose;
        let (height, round) = (state.height, state.round);
        let request = BlockRequest {
            version: self.config.block_version,
            proposer: local.clone(),
            round,
            start_time: now,
            committee: state.view.signing_committee().to_vec(),
            previous_hash: state.view.last_block_hash,
        };

        let block = match self.chain.create_block(request).await {
            Ok(block) => block,
            Err(err) => {
                warn!(chain = %self.chain_id, height, round, "[bft] Block creation failed: {}", err);
                if let Some(state) = self.round.as_mut() {
                    state.phase = Phase::Listen;
                }
                return;
            }
        };

        let msg = ProposeMsg {
            chain: self.chain_id,
            proposer: local,
            block: block.clone(),
        };
        info!(
            chain = %self.chain_id,
            height,
            round,
            hash = %hex_short(&block.hash()),
            "[bft] Proposing block"
        );
        if let Err(err) = self.network.broadcast(WireMessage::Propose(msg.clone())).await {
            warn!(chain = %self.chain_id, height, round, "[bft] Propose broadcast failed: {}", err);
        }
        if let Some(state) = self.round.as_mut() {
            state.own_propose = Some(msg);
        }
        self.admit(block).await;
    }

    // =========================================================================
    // LISTEN
    // =========================================================================

    async fn on_propose(&mut self, msg: ProposeMsg) {
        if msg.chain != self.chain_id {
            debug!(chain = %self.chain_id, target = %msg.chain, "[bft] Propose for another chain dropped");
            return;
        }
        let incoming = (msg.height(), msg.round());
        if self.height_round().is_some_and(|current| incoming > current) {
            // Our view of the tip or the clock may lag.
            self.refresh(false).await;
        }

        let Some(state) = self.round.as_ref() else { return };
        if incoming != (state.height, state.round) {
            debug!(
                chain = %self.chain_id,
                height = incoming.0,
                round = incoming.1,
                "[bft] Propose outside current round ignored"
            );
            return;
        }
        if state.phase != Phase::Listen || state.proposal.is_some() {
            debug!(chain = %self.chain_id, height = state.height, round = state.round, "[bft] Proposal already admitted");
            return;
        }
        if state.rejected == Some(msg.block.hash()) {
            return;
        }

        if let Err(err) = check_propose(state, &msg) {
            warn!(chain = %self.chain_id, proposer = %msg.proposer.short(), "[bft] {}", err);
            metrics::record_proposal_rejected();
            return;
        }
        debug!(
            chain = %self.chain_id,
            height = state.height,
            round = state.round,
            proposer = %msg.proposer.short(),
            "[bft] Propose accepted"
        );
        self.admit(msg.block).await;
    }

    /// Install `block` as the round's proposal and move to VOTE.
    async fn admit(&mut self, block: Block) {
        let Some(state) = self.round.as_mut() else { return };
        let signing = state.view.signing_committee().to_vec();
        let local_index = self
            .local_key
            .as_ref()
            .and_then(|local| signing.iter().position(|member| member == local));
        state.proposal = Some(ProposeBlockInfo::new(
            block,
            state.view.committee.clone(),
            signing,
            local_index,
        ));
        state.phase = Phase::Vote;

        let early = self.early_votes.take(state.height, state.round);
        if !early.is_empty() {
            debug!(chain = %self.chain_id, count = early.len(), "[bft] Draining early votes");
            self.count_votes(early);
        }
        self.vote().await;
    }

    // =========================================================================
    // VOTE
    // =========================================================================

    async fn vote(&mut self) {
        let Some(state) = self.round.as_ref() else { return };
        let Some(proposal) = state.proposal.as_ref() else { return };
        let block = proposal.block.clone();
        let signing = proposal.signing_committee.clone();
        let (hash, local_index) = (proposal.hash, proposal.local_index);
        let (height, round) = (state.height, state.round);

        if let Err(err) = self.chain.validate_pre_sign_block(&block, &signing).await {
            warn!(
                chain = %self.chain_id,
                height,
                round,
                hash = %hex_short(&hash),
                "[bft] Proposal rejected by chain: {}",
                err
            );
            metrics::record_proposal_rejected();
            if let Some(state) = self.round.as_mut() {
                state.proposal = None;
                state.rejected = Some(hash);
                state.phase = Phase::Listen;
            }
            return;
        }

        let own_vote = match local_index {
            Some(index) => match self.sign_vote(height, round, hash) {
                Ok(vote) => Some((index, vote)),
                Err(err) => {
                    error!(chain = %self.chain_id, height, round, "[bft] Signing failed: {}", err);
                    None
                }
            },
            None => None,
        };

        if let Some(state) = self.round.as_mut() {
            state.phase = Phase::Commit;
            if let Some(proposal) = state.proposal.as_mut() {
                proposal.is_valid = true;
                if let Some((index, vote)) = &own_vote {
                    proposal.record(vote.clone(), *index, true);
                }
            }
            state.local_vote = own_vote.as_ref().map(|(_, vote)| vote.clone());
        }
        if let Some((_, vote)) = own_vote {
            debug!(chain = %self.chain_id, height, round, "[bft] Voted");
            self.send_vote(vote).await;
        }
        self.try_finalize().await;
    }

    fn sign_vote(&self, height: u64, round: u32, hash: Hash) -> ConsensusResult<VoteMsg> {
        let (Some(secrets), Some(local)) = (&self.secrets, &self.local_key) else {
            return Err(ConsensusError::Aggregation(AggregationError::InvalidKey(
                "no local validator key".into(),
            )));
        };
        let partial = self.aggregator.sign(&hash, &secrets.mining)?;
        let bridge = self.aggregator.sign_bridge(&hash, &secrets.bridge)?;
        Ok(VoteMsg {
            chain: self.chain_id,
            height,
            round,
            block_hash: hash,
            validator: local.fingerprint().clone(),
            partial_signature: partial.as_bytes().to_vec(),
            bridge_signature: Some(bridge),
            timestamp: self.clock.now_ms(),
        })
    }

    async fn send_vote(&self, vote: VoteMsg) {
        if let Err(err) = self
            .network
            .send_to_chain(self.chain_id, WireMessage::Vote(vote))
            .await
        {
            debug!(chain = %self.chain_id, "[bft] Vote send failed, retrying on tick: {}", err);
        }
    }

    /// Re-send our propose and vote while the round is collecting.
    async fn rebroadcast(&self) {
        let Some(state) = self.round.as_ref() else { return };
        if state.phase != Phase::Commit || state.finalized {
            return;
        }
        if let Some(msg) = &state.own_propose {
            if let Err(err) = self.network.broadcast(WireMessage::Propose(msg.clone())).await {
                debug!(chain = %self.chain_id, "[bft] Propose re-broadcast failed: {}", err);
            }
        }
        if let Some(vote) = &state.local_vote {
            self.send_vote(vote.clone()).await;
        }
    }

    // =========================================================================
    // COMMIT
    // =========================================================================

    async fn on_vote(&mut self, vote: VoteMsg) {
        if vote.chain != self.chain_id {
            return;
        }
        let Some(state) = self.round.as_ref() else { return };
        let current = (state.height, state.round);
        let incoming = (vote.height, vote.round);

        if incoming == current && state.proposal.is_some() {
            self.count_votes(vec![vote]);
            self.try_finalize().await;
            return;
        }
        if incoming >= current && vote.height <= current.0 + 1 {
            let committee = state.view.signing_committee();
            if vote.height == current.0 && !committee.iter().any(|k| k.fingerprint() == &vote.validator) {
                metrics::record_vote("rejected");
                debug!(
                    chain = %self.chain_id,
                    validator = %vote.validator.short(),
                    "[bft] Early vote from outside the committee dropped"
                );
                return;
            }
            let slot_limit = committee.len().max(1);
            let validator = vote.validator.clone();
            if self.early_votes.push(vote, self.clock.now_ms(), slot_limit) {
                metrics::record_vote("early");
                debug!(
                    chain = %self.chain_id,
                    height = incoming.0,
                    round = incoming.1,
                    validator = %validator.short(),
                    "[bft] Vote buffered until its propose arrives"
                );
            } else {
                debug!(chain = %self.chain_id, "[bft] Early vote not buffered");
            }
            return;
        }
        metrics::record_vote("stale");
        debug!(
            chain = %self.chain_id,
            height = incoming.0,
            round = incoming.1,
            "[bft] Stale vote dropped"
        );
    }

    /// Validate and record votes for the current proposal. Signatures are
    /// checked as one parallel batch.
    fn count_votes(&mut self, votes: Vec<VoteMsg>) {
        let chain = self.chain_id;
        let aggregator = &self.aggregator;
        let Some(proposal) = self.round.as_mut().and_then(|state| state.proposal.as_mut()) else {
            return;
        };

        let mut batch = Vec::with_capacity(votes.len());
        for vote in votes {
            if vote.block_hash != proposal.hash {
                proposal.record_error();
                metrics::record_vote("rejected");
                warn!(chain = %chain, "[bft] {}", ConsensusError::bad_vote(&vote.validator, "block hash mismatch"));
                continue;
            }
            let Some(index) = proposal.index_of(&vote.validator) else {
                proposal.record_error();
                metrics::record_vote("rejected");
                warn!(chain = %chain, "[bft] {}", ConsensusError::bad_vote(&vote.validator, "not in signing committee"));
                continue;
            };
            if !proposal.needs_verification(&vote.validator) {
                metrics::record_vote("duplicate");
                debug!(chain = %chain, validator = %vote.validator.short(), "[bft] Duplicate vote ignored");
                continue;
            }
            batch.push((vote, index));
        }
        if batch.is_empty() {
            return;
        }

        let parsed: Vec<Option<PartialSig>> = batch
            .iter()
            .map(|(vote, _)| PartialSig::from_slice(&vote.partial_signature))
            .collect();
        let to_verify: Vec<(usize, PartialSig)> = batch
            .iter()
            .zip(&parsed)
            .filter_map(|((_, index), sig)| sig.map(|sig| (*index, sig)))
            .collect();
        let mut verdicts = aggregator
            .verify_partials_batch(&proposal.hash, &proposal.signing_committee, &to_verify)
            .into_iter();

        for ((vote, index), sig) in batch.into_iter().zip(parsed) {
            let mut verdict = match sig {
                Some(_) => verdicts
                    .next()
                    .unwrap_or(Err(AggregationError::BadSig { index })),
                None => Err(AggregationError::BadSig { index }),
            };
            if verdict.is_ok() {
                if let Some(bridge) = &vote.bridge_signature {
                    verdict = aggregator.verify_bridge(&proposal.hash, &proposal.signing_committee[index], bridge);
                }
            }

            let validator = vote.validator.clone();
            match proposal.record(vote, index, verdict.is_ok()) {
                VoteOutcome::Counted | VoteOutcome::Replaced => {
                    metrics::record_vote("counted");
                    debug!(
                        chain = %chain,
                        validator = %validator.short(),
                        votes = proposal.valid_votes,
                        required = proposal.required_votes(),
                        "[bft] Vote counted"
                    );
                }
                VoteOutcome::Duplicate => {
                    metrics::record_vote("duplicate");
                    debug!(chain = %chain, validator = %validator.short(), "[bft] Duplicate vote ignored");
                }
                VoteOutcome::Rejected => {
                    metrics::record_vote("rejected");
                    let reason = verdict.err().map_or_else(|| "superseded".to_string(), |e| e.to_string());
                    warn!(chain = %chain, "[bft] {}", ConsensusError::bad_vote(&validator, reason));
                }
            }
        }
    }

    async fn try_finalize(&mut self) {
        let Some(state) = self.round.as_mut() else { return };
        if state.phase != Phase::Commit || state.finalized {
            return;
        }
        let Some(proposal) = state.proposal.as_mut() else { return };
        if !proposal.has_new_vote {
            return;
        }
        proposal.has_new_vote = false;
        if !proposal.has_quorum() {
            debug!(
                chain = %self.chain_id,
                "[bft] {}",
                ConsensusError::InsufficientQuorum {
                    votes: proposal.valid_votes,
                    required: proposal.required_votes(),
                }
            );
            return;
        }

        let aggregate = match self.aggregator.aggregate(
            &proposal.hash,
            &proposal.signing_committee,
            &proposal.valid_signatures(),
        ) {
            Ok(aggregate) => aggregate,
            Err(err) => {
                error!(chain = %self.chain_id, height = state.height, "[bft] Aggregation failed: {}", err);
                return;
            }
        };
        let mut block = proposal.block.clone();
        block.validation = Some(aggregate.to_validation_data(proposal.bridge_signatures()));
        let signing = proposal.signing_committee.clone();
        let (height, round, hash) = (state.height, state.round, proposal.hash);
        let elapsed = state.started_at.elapsed();

        if let Err(err) = self.chain.validate_block_signatures(&block, &signing).await {
            error!(chain = %self.chain_id, height, round, "[bft] Aggregate rejected: {}", err);
            return;
        }

        match self.chain.insert_and_broadcast(block.clone()).await {
            Ok(()) => {
                info!(
                    chain = %self.chain_id,
                    height,
                    round,
                    hash = %hex_short(&hash),
                    signers = aggregate.signer_count(),
                    "[bft] Block finalized"
                );
                metrics::record_finalized(&self.chain_id.to_string(), elapsed.as_secs_f64());
                if let Some(state) = self.round.as_mut() {
                    state.finalized = true;
                }
                self.publish(NodeEvent::BlockFinalized {
                    chain: self.chain_id,
                    height,
                    round,
                    hash,
                    block: Arc::new(block),
                })
                .await;
                self.advance_pending = true;
            }
            Err(ChainError::Stale) => {
                debug!(chain = %self.chain_id, height, "[bft] Height already filled, moving on");
                self.advance_pending = true;
            }
            Err(err) => {
                error!(chain = %self.chain_id, height, round, "[bft] Insert failed: {}", err);
                // Retried on the next tick.
                if let Some(proposal) = self.round.as_mut().and_then(|state| state.proposal.as_mut()) {
                    proposal.has_new_vote = true;
                }
            }
        }
    }

    async fn publish(&self, event: NodeEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event).await;
        }
    }
}

/// Proposer identity and committee binding of an incoming propose.
fn check_propose(state: &RoundState, msg: &ProposeMsg) -> ConsensusResult<()> {
    let bad = |reason: String| ConsensusError::BadProposer {
        height: state.height,
        round: state.round,
        reason,
    };

    if msg.block.chain() != msg.chain {
        return Err(bad(format!("block belongs to {}", msg.block.chain())));
    }
    let expected = state
        .view
        .proposer_for(state.round)
        .ok_or_else(|| bad("empty committee".into()))?;
    if msg.proposer != *expected.fingerprint() {
        return Err(bad(format!("expected {}", expected.fingerprint().short())));
    }
    if msg.block.header.proposer != msg.proposer {
        return Err(bad("header proposer differs from sender".into()));
    }
    if msg.block.header.committee_root != committee_hash(state.view.signing_committee()) {
        return Err(bad("committee root does not match".into()));
    }
    if msg.block.header.previous_hash != state.view.last_block_hash {
        return Err(bad("does not extend the current tip".into()));
    }
    Ok(())
}

/// Owner's side of a spawned driver.
pub struct DriverHandle {
    chain: ChainId,
    inbox: Arc<Inbox>,
    join: JoinHandle<()>,
}

impl DriverHandle {
    pub fn chain(&self) -> ChainId {
        self.chain
    }

    pub fn send(&self, input: DriverInput) -> PushOutcome {
        self.inbox.push(input)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the driver and wait for its task to exit.
    pub async fn shutdown(self) {
        self.inbox.push(DriverInput::Shutdown);
        if let Err(err) = self.join.await {
            warn!(chain = %self.chain, "[bft] Driver task ended abnormally: {}", err);
        }
    }
}
