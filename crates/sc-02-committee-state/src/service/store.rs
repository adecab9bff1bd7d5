//! # Committee State Store
//!
//! Single-writer, many-reader holder of the current [`CommitteeState`].
//! Snapshots are published through a `watch` channel of `Arc`s, so a
//! reader always holds one complete snapshot and never takes a lock.

use std::sync::Arc;

use parking_lot::Mutex;
use shared_types::ChainId;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::domain::change::CommitteeChange;
use crate::domain::errors::{BatchFailure, StoreError};
use crate::domain::instruction::Instruction;
use crate::domain::params::ProcessEnv;
use crate::domain::state::CommitteeState;
use crate::metrics;
use crate::ports::outbound::StateStore;
use crate::service::processor::InstructionProcessor;

pub struct CommitteeStateStore {
    sender: watch::Sender<Arc<CommitteeState>>,
    /// Serialises writers; never held across an await.
    writer: Mutex<()>,
}

impl CommitteeStateStore {
    pub fn new(initial: CommitteeState) -> Self {
        metrics::observe_state(&initial);
        let (sender, _) = watch::channel(Arc::new(initial));
        Self {
            sender,
            writer: Mutex::new(()),
        }
    }

    /// Resume from the latest persisted beacon snapshot, or start from
    /// `genesis` when none exists.
    pub fn bootstrap(store: &dyn StateStore, genesis: CommitteeState) -> Result<Self, StoreError> {
        match store.latest_committee_snapshot(ChainId::Beacon)? {
            Some((height, state)) => {
                info!(height, epoch = state.epoch(), "[committee] Restored committee snapshot");
                Ok(Self::new((*state).clone()))
            }
            None => {
                info!("[committee] Starting from genesis committee");
                Ok(Self::new(genesis))
            }
        }
    }

    pub fn current(&self) -> Arc<CommitteeState> {
        Arc::clone(&self.sender.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<CommitteeState>> {
        self.sender.subscribe()
    }

    /// Fold `instructions` into a copy of the current snapshot and publish
    /// it. On a fatal failure nothing is published.
    pub fn commit(
        &self,
        env: &ProcessEnv,
        instructions: &[Instruction],
    ) -> Result<(CommitteeChange, Arc<CommitteeState>), BatchFailure> {
        let _guard = self.writer.lock();
        let current = self.current();
        if instructions.is_empty() {
            return Ok((CommitteeChange::default(), current));
        }

        let mut next = (*current).clone();
        match InstructionProcessor::process_batch(&mut next, env, instructions) {
            Ok(change) if next == *current => {
                debug!(height = env.height, "[committee] Batch changed nothing");
                Ok((change, current))
            }
            Ok(change) => {
                let next = Arc::new(next);
                self.sender.send_replace(Arc::clone(&next));
                metrics::record_commit();
                metrics::observe_state(&next);
                info!(
                    epoch = next.epoch(),
                    height = next.height(),
                    instructions = instructions.len(),
                    changed = change.changed_committees().len(),
                    slashed = change.slashed().len(),
                    "[committee] Committed state"
                );
                Ok((change, next))
            }
            Err(failure) => {
                error!(
                    height = env.height,
                    "[committee] Batch rejected, keeping previous snapshot: {}",
                    failure.error
                );
                Err(failure)
            }
        }
    }

    /// Persist the current snapshot under the beacon chain key.
    pub fn persist(&self, store: &dyn StateStore) -> Result<(), StoreError> {
        let current = self.current();
        store.put_committee_snapshot(ChainId::Beacon, current.height(), current)
    }
}
