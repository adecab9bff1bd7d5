//! # Node Events
//!
//! Facts published on the bus.

use std::sync::Arc;

use shared_types::{Block, ChainId, Hash, ShardId};

/// All events that can be published to the event bus.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A BFT driver finalised a block and handed it to its chain.
    BlockFinalized {
        chain: ChainId,
        height: u64,
        round: u32,
        hash: Hash,
        block: Arc<Block>,
    },

    /// A new committee-state snapshot was published.
    CommitteeStateCommitted {
        epoch: u64,
        height: u64,
        /// Chains whose committee changed in this commit.
        changed_chains: Vec<ChainId>,
        slashed: usize,
    },

    /// A cross-shard payload passed validation and entered the pool.
    CrossShardPayloadValidated {
        from_shard: ShardId,
        to_shard: ShardId,
        height: u64,
        hash: Hash,
    },

    /// A driver was started or stopped by the orchestrator.
    DriverLifecycle { chain: ChainId, running: bool },

    /// An unrecoverable condition; the runtime shuts down on receipt.
    CriticalError { subsystem: &'static str, error: String },
}

impl NodeEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::BlockFinalized { .. } | Self::DriverLifecycle { .. } => EventTopic::Consensus,
            Self::CommitteeStateCommitted { .. } => EventTopic::CommitteeState,
            Self::CrossShardPayloadValidated { .. } => EventTopic::CrossShard,
            Self::CriticalError { .. } => EventTopic::DeadLetterQueue,
        }
    }

    /// Chain the event concerns, if it concerns exactly one.
    pub fn chain(&self) -> Option<ChainId> {
        match self {
            Self::BlockFinalized { chain, .. } | Self::DriverLifecycle { chain, .. } => Some(*chain),
            Self::CrossShardPayloadValidated { to_shard, .. } => Some(ChainId::Shard(*to_shard)),
            Self::CommitteeStateCommitted { .. } | Self::CriticalError { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    Consensus,
    CommitteeState,
    CrossShard,
    DeadLetterQueue,
    All,
}

/// Subscription filter. Empty lists match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub topics: Vec<EventTopic>,
    pub chains: Vec<ChainId>,
}

impl EventFilter {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            chains: Vec::new(),
        }
    }

    /// Restrict to events about `chain`. Chain-less events still pass.
    #[must_use]
    pub fn for_chain(mut self, chain: ChainId) -> Self {
        self.chains.push(chain);
        self
    }

    pub fn matches(&self, event: &NodeEvent) -> bool {
        let topic_match = self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic());

        let chain_match = self.chains.is_empty()
            || event.chain().map_or(true, |c| self.chains.contains(&c));

        topic_match && chain_match
    }
}
