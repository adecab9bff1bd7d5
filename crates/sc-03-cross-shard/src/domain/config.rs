//! Pool and sync configuration.

use std::time::Duration;

/// Bounds of the [`crate::CrossShardPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Total payloads held; the oldest is evicted beyond this.
    pub capacity: usize,
    /// Unvalidated payloads held at once.
    pub max_pending: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            max_pending: 512,
        }
    }
}

impl PoolConfig {
    pub fn for_testing() -> Self {
        Self {
            capacity: 16,
            max_pending: 4,
        }
    }
}

/// Timing of the [`crate::CrossShardSyncProcess`] loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// A request unanswered for this long is dropped and rediscovered.
    pub request_deadline: Duration,
    /// Outstanding requests older than this are sent again.
    pub reissue_after: Duration,
    /// Sleep while requests are outstanding.
    pub active_sleep: Duration,
    /// Sleep when idle or backing off.
    pub idle_sleep: Duration,
    /// Heights discovered per source shard and iteration.
    pub max_heights_per_request: usize,
    pub command_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_deadline: Duration::from_secs(60),
            reissue_after: Duration::from_secs(10),
            active_sleep: Duration::from_secs(1),
            idle_sleep: Duration::from_secs(15),
            max_heights_per_request: 32,
            command_capacity: 256,
        }
    }
}

impl SyncConfig {
    pub fn for_testing() -> Self {
        Self {
            request_deadline: Duration::from_secs(6),
            reissue_after: Duration::from_secs(1),
            active_sleep: Duration::from_millis(100),
            idle_sleep: Duration::from_millis(500),
            max_heights_per_request: 8,
            command_capacity: 32,
        }
    }
}
