//! # Domain Errors
//!
//! Error types for cross-shard synchronisation.

use shared_types::{CodecError, NetworkError, ShardId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrossShardError {
    /// Too many unvalidated payloads are waiting.
    #[error("Cross-shard pool full (capacity {capacity})")]
    PoolFull { capacity: usize },

    /// Payload does not match its beacon confirmation.
    #[error("Payload at height {height} unverified: {reason}")]
    PayloadUnverified { height: u64, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Unknown shard: {0}")]
    UnknownShard(ShardId),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The sync process is no longer running.
    #[error("Sync process stopped")]
    Stopped,
}

impl CrossShardError {
    pub(crate) fn unverified(height: u64, reason: impl Into<String>) -> Self {
        CrossShardError::PayloadUnverified {
            height,
            reason: reason.into(),
        }
    }

    /// Whether the sync loop should slow down after this error.
    pub fn should_back_off(&self) -> bool {
        matches!(
            self,
            CrossShardError::PoolFull { .. }
                | CrossShardError::PayloadUnverified { .. }
                | CrossShardError::Network(_)
        )
    }
}

pub type CrossShardResult<T> = Result<T, CrossShardError>;
