//! # Domain Errors
//!
//! Error types for the committee-state subsystem.

use shared_types::{ChainId, Fingerprint, KeyError, ShardId};
use thiserror::Error;

use super::change::CommitteeChange;

/// Failures raised while turning a raw instruction into a typed one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstructionError {
    #[error("Empty instruction")]
    Empty,

    #[error("Unknown instruction kind: {0}")]
    UnknownKind(String),

    #[error("{kind}: missing field `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("{kind}: field lengths disagree")]
    LengthMismatch { kind: &'static str },

    #[error("{kind}: no keys listed")]
    NoKeys { kind: &'static str },

    #[error("Invalid key: {0}")]
    BadKey(#[from] KeyError),

    #[error("Invalid number in `{field}`: {value}")]
    BadNumber { field: &'static str, value: String },

    #[error("Invalid chain: {0}")]
    BadChain(String),

    #[error("Key listed twice: {0}")]
    DuplicateKey(Fingerprint),

    #[error("Stake amount must be positive for {0}")]
    ZeroStake(Fingerprint),

    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Committee-state errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitteeError {
    /// Malformed, duplicate or unauthorised instruction. Skipped.
    #[error("Invalid instruction: {0}")]
    InvalidInstruction(#[from] InstructionError),

    /// Stake for a key that already holds a role or candidacy. Skipped.
    #[error("Duplicate stake: {0}")]
    DuplicateStake(Fingerprint),

    /// Shard id outside `[0, active_shards)`.
    #[error("Unknown shard: {0}")]
    UnknownShard(ShardId),

    /// Post-instruction state check failed. Fatal.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl CommitteeError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CommitteeError::InvariantViolation(_))
    }

    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            CommitteeError::InvalidInstruction(_) => "invalid_instruction",
            CommitteeError::DuplicateStake(_) => "duplicate_stake",
            CommitteeError::UnknownShard(_) => "unknown_shard",
            CommitteeError::InvariantViolation(_) => "invariant_violation",
        }
    }
}

/// A batch aborted by a fatal error. `partial` covers every instruction
/// applied before the failing one.
#[derive(Debug, Clone, Error)]
#[error("Batch aborted after partial change: {error}")]
pub struct BatchFailure {
    pub partial: CommitteeChange,
    pub error: CommitteeError,
}

/// Errors from a [`crate::StateStore`] backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A different block is already stored at this height.
    #[error("Conflicting block at {chain} height {height}: stored {stored}")]
    Conflict {
        chain: ChainId,
        height: u64,
        stored: String,
    },

    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type CommitteeResult<T> = Result<T, CommitteeError>;
