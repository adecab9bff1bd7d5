//! # Cross-Shard Subsystem
//!
//! Pulls the cross-shard payloads destined for the local shard, validates
//! them against beacon confirmations and keeps them in a bounded pool until
//! a local block consumes them.
//!
//! ## Flow
//!
//! ```text
//! BeaconView ──► discover confirmed heights ──► OutstandingRequest
//!                                                    │
//! CrossShardPeers ◄── CrossShardRequest ◄────────────┘
//!        │
//!        ▼
//! CrossShardPool (pending) ──► validate ──► CrossShardPool (validated) ──► take / prune
//! ```
//!
//! ## Invariants
//!
//! - `has` and `take` only see validated payloads.
//! - A payload is validated only against a beacon-confirmed hash.
//! - Only the sync actor mutates outstanding requests.

pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;

pub use domain::*;
pub use ports::{BeaconView, CrossShardPeers, MockBeaconView, MockPeers, MockShardView, ShardView};
pub use service::{CrossShardSyncProcess, SyncCommand, SyncHandle, SyncStatus};
