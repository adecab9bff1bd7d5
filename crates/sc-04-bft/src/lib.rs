//! # BFT Subsystem
//!
//! One [`BftDriver`] per chain the node validates. A driver runs the
//! single-vote protocol: the rotation proposer broadcasts a block, every
//! committee member that accepts it sends one partial signature, and any
//! node that sees more than two thirds of the signing committee aggregates
//! them and inserts the block.
//!
//! ## Round rule
//!
//! ```text
//! next_height = current_height + 1
//! round       = 1 + max(0, (now - last_block_time - min_block_interval) / round_timeout)
//! proposer    = committee[(last_proposer_index + round) mod |committee|]
//! ```
//!
//! ## Guarantees
//!
//! - Rounds of one driver never overlap; inputs are handled in inbox order.
//! - A vote is counted at most once per validator and round.
//! - A round cancelled before finalisation broadcasts nothing further.

pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;

pub use domain::*;
pub use ports::{
    ChainCollaborator, Clock, ConsensusNetwork, ManualClock, MockChain, MockNetwork, SystemClock,
};
pub use service::{BftDriver, DriverHandle, DriverInput, Inbox, PushOutcome};
