//! Error types for the BFT driver.

use sc_01_signature_aggregation::AggregationError;
use shared_types::NetworkError;
use thiserror::Error;

/// Failures reported by a chain collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Chain not ready to build a block")]
    NotReady,

    #[error("Block creation overdue")]
    Overdue,

    #[error("Chain internal error: {0}")]
    Internal(String),

    #[error("Invalid block: {0}")]
    Invalid(String),

    /// The block does not extend the current tip.
    #[error("Stale block")]
    Stale,

    #[error("Aggregate signature does not verify")]
    BadAggregate,

    #[error("Aggregate does not carry a quorum")]
    InsufficientQuorum,
}

/// Consensus errors. None of them stop the driver; they are handled by the
/// round's normal transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("Bad proposer for height {height} round {round}: {reason}")]
    BadProposer { height: u64, round: u32, reason: String },

    #[error("Bad vote from {validator}: {reason}")]
    BadVote { validator: String, reason: String },

    #[error("Insufficient quorum: {votes} valid votes, {required} required")]
    InsufficientQuorum { votes: usize, required: usize },

    #[error("Round timed out at height {height} round {round}")]
    Timeout { height: u64, round: u32 },

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Invalid consensus config: {0}")]
    InvalidConfig(String),

    #[error("Driver stopped")]
    Stopped,
}

impl ConsensusError {
    pub(crate) fn bad_vote(validator: &shared_types::Fingerprint, reason: impl Into<String>) -> Self {
        ConsensusError::BadVote {
            validator: validator.short().to_string(),
            reason: reason.into(),
        }
    }
}

pub type ConsensusResult<T> = Result<T, ConsensusError>;
