//! Pure committee algorithms.

pub mod shard_assignment;
pub mod swap_rule;

pub use shard_assignment::{assign_candidates, assignment_hash, Assignment};
pub use swap_rule::{SwapInput, SwapOutcome, SwapRule};
