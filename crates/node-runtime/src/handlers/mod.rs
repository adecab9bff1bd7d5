//! # Event Handlers
//!
//! Bus consumers that turn finalised blocks into state changes.

pub mod instructions;

pub use instructions::{BeaconInstructionHandler, HandlerError};
