//! # Committee State Subsystem
//!
//! Authoritative committee membership for the beacon chain and every shard,
//! and the instruction processor that evolves it from beacon block to
//! beacon block.
//!
//! ## Architecture
//!
//! ```text
//! beacon block ──► [RawInstruction] ──► Instruction::from_raw
//!                                              │
//!                                              ▼
//! CommitteeStateStore::commit ── clone ──► InstructionProcessor::process_batch
//!        │                                     │  SwapRule / shard assignment
//!        ▼                                     ▼
//!  watch<Arc<CommitteeState>>  ◄── publish ── CommitteeChange
//! ```
//!
//! ## Invariants
//!
//! - A fingerprint sits in at most one list.
//! - Every listed fingerprint has staker info.
//! - Fixed nodes lead their committee and are never swapped out.
//! - Shard committees stay at or above minimum size outside bootstrap.

pub mod algorithms;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;

pub use algorithms::{assign_candidates, Assignment, SwapInput, SwapOutcome, SwapRule};
pub use domain::*;
pub use ports::{InMemoryStateStore, StateStore};
pub use service::{CommitteeStateStore, InstructionProcessor};
