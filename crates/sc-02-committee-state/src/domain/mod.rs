//! Domain layer for committee state.

pub mod change;
pub mod errors;
pub mod instruction;
pub mod params;
pub mod staker;
pub mod state;

pub use change::*;
pub use errors::*;
pub use instruction::*;
pub use params::*;
pub use staker::*;
pub use state::*;
