//! # Ports
//!
//! The chain collaborator, the network and the clock.

pub mod outbound;

pub use outbound::{
    ChainCollaborator, Clock, ConsensusNetwork, ManualClock, MockChain, MockNetwork, SystemClock,
};
