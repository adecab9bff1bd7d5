//! # Genesis Module
//!
//! Genesis committee creation for devnets.
//!
//! - Height: 0, epoch 1
//! - Every chain's committee is filled from deterministic seeds
//! - The first member of each committee is a fixed node

pub mod builder;

pub use builder::{Genesis, GenesisBuilder, GenesisConfig, GenesisError};
