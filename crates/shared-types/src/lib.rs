//! # Shared Types Crate
//!
//! Domain entities and wire messages shared by the consensus, committee-state
//! and cross-shard subsystems.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every cross-subsystem type is defined here.
//! - **Fingerprints are identities**: a [`ValidatorKey`] is compared, ordered
//!   and indexed by its base58 [`Fingerprint`] and nothing else.
//! - **Canonical encodings**: anything hashed or persisted has exactly one
//!   byte representation.

pub mod block;
pub mod cross_shard;
pub mod entities;
pub mod errors;
pub mod ipc;
pub mod merkle;

pub use block::*;
pub use cross_shard::*;
pub use entities::*;
pub use errors::*;
pub use ipc::*;
