//! # Domain Layer
//!
//! Round arithmetic, vote accounting and configuration. No I/O.

pub mod config;
pub mod early_votes;
pub mod errors;
pub mod round;
pub mod view;

pub use config::{BftConfig, MIN_INBOX_CAPACITY};
pub use early_votes::EarlyVoteBuffer;
pub use errors::{ChainError, ConsensusError, ConsensusResult};
pub use round::{Phase, ProposeBlockInfo, VoteOutcome, VoteRecord};
pub use view::{proposer_index, round_at, BlockRequest, ChainView};
