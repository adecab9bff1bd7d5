//! # Driver Inbox
//!
//! Bounded queue in front of one driver. When it is full:
//!
//! 1. the oldest vote for a superseded `(height, round)` is dropped,
//! 2. then the oldest propose not for the current round,
//! 3. otherwise an incoming vote is dropped.
//!
//! Control inputs are never evicted and never refused. A propose for the
//! current round is never evicted by a vote.

use std::collections::VecDeque;

use parking_lot::Mutex;
use shared_types::{ProposeMsg, VoteMsg};
use tokio::sync::Notify;

use crate::metrics;

#[derive(Debug, Clone)]
pub enum DriverInput {
    Propose(ProposeMsg),
    Vote(VoteMsg),
    /// Run the periodic tick now.
    Timer,
    /// The chain tip moved; re-read the view.
    ChainAdvanced,
    /// The committee changed; abandon the round and re-read the view.
    CommitteeChanged,
    Shutdown,
}

impl DriverInput {
    pub fn kind(&self) -> &'static str {
        match self {
            DriverInput::Propose(_) => "propose",
            DriverInput::Vote(_) => "vote",
            DriverInput::Timer => "timer",
            DriverInput::ChainAdvanced => "chain_advanced",
            DriverInput::CommitteeChanged => "committee_changed",
            DriverInput::Shutdown => "shutdown",
        }
    }

    pub fn is_control(&self) -> bool {
        !matches!(self, DriverInput::Propose(_) | DriverInput::Vote(_))
    }

    fn height_round(&self) -> Option<(u64, u32)> {
        match self {
            DriverInput::Propose(msg) => Some((msg.height(), msg.round())),
            DriverInput::Vote(vote) => Some((vote.height, vote.round)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting an older input of this kind.
    Evicted(&'static str),
    /// The incoming input was dropped.
    Dropped,
    Closed,
}

#[derive(Debug)]
struct InboxState {
    queue: VecDeque<DriverInput>,
    current: (u64, u32),
    closed: bool,
}

#[derive(Debug)]
pub struct Inbox {
    capacity: usize,
    state: Mutex<InboxState>,
    notify: Notify,
}

impl Inbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(InboxState {
                queue: VecDeque::with_capacity(capacity),
                current: (0, 0),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, input: DriverInput) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            if input.is_control() || state.queue.len() < self.capacity {
                state.queue.push_back(input);
                PushOutcome::Queued
            } else {
                match Self::victim(&state, &input) {
                    Some(position) => {
                        let kind = state
                            .queue
                            .remove(position)
                            .map_or("unknown", |evicted| evicted.kind());
                        state.queue.push_back(input);
                        PushOutcome::Evicted(kind)
                    }
                    None => PushOutcome::Dropped,
                }
            }
        };
        match outcome {
            PushOutcome::Queued => {}
            PushOutcome::Evicted(kind) => metrics::record_inbox_drop(kind),
            PushOutcome::Dropped => metrics::record_inbox_drop("incoming"),
            PushOutcome::Closed => return outcome,
        }
        self.notify.notify_one();
        outcome
    }

    fn victim(state: &InboxState, incoming: &DriverInput) -> Option<usize> {
        let current = state.current;
        let stale_vote = state.queue.iter().position(|queued| {
            matches!(queued, DriverInput::Vote(_))
                && queued.height_round().is_some_and(|hr| hr < current)
        });
        if stale_vote.is_some() {
            return stale_vote;
        }
        let old_propose = state.queue.iter().position(|queued| {
            matches!(queued, DriverInput::Propose(_)) && queued.height_round() != Some(current)
        });
        if old_propose.is_some() {
            return old_propose;
        }
        // A current-round propose may still displace any vote.
        if matches!(incoming, DriverInput::Propose(_)) && incoming.height_round() == Some(current) {
            return state
                .queue
                .iter()
                .position(|queued| matches!(queued, DriverInput::Vote(_)));
        }
        None
    }

    pub fn pop(&self) -> Option<DriverInput> {
        self.state.lock().queue.pop_front()
    }

    /// Tell the inbox which round the driver is in.
    pub fn set_current(&self, height: u64, round: u32) {
        self.state.lock().current = (height, round);
    }

    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Refuse further inputs. Already queued inputs can still be popped.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Block, BlockHeader, ChainId, Fingerprint};

    fn vote(height: u64, round: u32) -> DriverInput {
        DriverInput::Vote(VoteMsg {
            chain: ChainId::Shard(1),
            height,
            round,
            block_hash: [0; 32],
            validator: Fingerprint::from(format!("v{height}-{round}")),
            partial_signature: vec![0; 48],
            bridge_signature: None,
            timestamp: 0,
        })
    }

    fn propose(height: u64, round: u32) -> DriverInput {
        DriverInput::Propose(ProposeMsg {
            chain: ChainId::Shard(1),
            proposer: Fingerprint::from("p".to_string()),
            block: Block {
                header: BlockHeader {
                    chain: ChainId::Shard(1),
                    version: 1,
                    height,
                    round,
                    epoch: 1,
                    timestamp: 0,
                    previous_hash: [0; 32],
                    proposer: Fingerprint::from("p".to_string()),
                    committee_root: [0; 32],
                    body_root: [0; 32],
                    cross_shard_root: [0; 32],
                    beacon_height: 0,
                },
                body: Vec::new(),
                validation: None,
            },
        })
    }

    fn kinds(inbox: &Inbox) -> Vec<(&'static str, Option<(u64, u32)>)> {
        let mut out = Vec::new();
        while let Some(input) = inbox.pop() {
            out.push((input.kind(), input.height_round()));
        }
        out
    }

    #[test]
    fn test_superseded_vote_evicted_first() {
        let inbox = Inbox::new(3);
        inbox.set_current(10, 2);
        inbox.push(propose(10, 1));
        inbox.push(vote(10, 2));
        inbox.push(vote(10, 1));

        assert_eq!(inbox.push(vote(10, 2)), PushOutcome::Evicted("vote"));
        assert_eq!(
            kinds(&inbox),
            vec![("propose", Some((10, 1))), ("vote", Some((10, 2))), ("vote", Some((10, 2)))]
        );
    }

    #[test]
    fn test_old_propose_evicted_before_current_votes() {
        let inbox = Inbox::new(2);
        inbox.set_current(10, 2);
        inbox.push(propose(10, 1));
        inbox.push(vote(10, 2));

        assert_eq!(inbox.push(vote(10, 2)), PushOutcome::Evicted("propose"));
        assert_eq!(inbox.len(), 2);
    }

    #[test]
    fn test_current_propose_never_evicted_by_vote() {
        let inbox = Inbox::new(2);
        inbox.set_current(10, 1);
        inbox.push(propose(10, 1));
        inbox.push(vote(10, 1));

        assert_eq!(inbox.push(vote(10, 1)), PushOutcome::Dropped);
        assert_eq!(
            kinds(&inbox),
            vec![("propose", Some((10, 1))), ("vote", Some((10, 1)))]
        );
    }

    #[test]
    fn test_current_propose_displaces_vote() {
        let inbox = Inbox::new(2);
        inbox.set_current(10, 1);
        inbox.push(vote(10, 1));
        inbox.push(vote(10, 1));

        assert_eq!(inbox.push(propose(10, 1)), PushOutcome::Evicted("vote"));
        assert_eq!(kinds(&inbox)[1].0, "propose");
    }

    #[test]
    fn test_control_inputs_always_accepted() {
        let inbox = Inbox::new(1);
        inbox.push(vote(1, 1));
        assert_eq!(inbox.push(DriverInput::Shutdown), PushOutcome::Queued);
        assert_eq!(inbox.len(), 2);

        inbox.close();
        assert_eq!(inbox.push(DriverInput::Timer), PushOutcome::Closed);
        assert_eq!(inbox.len(), 2);
    }
}
