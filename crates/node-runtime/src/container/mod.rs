//! # Node Container
//!
//! Configuration and construction of every node component.
//!
//! - `config`: [`NodeConfig`] with defaults, `SC_*` overrides and validation
//! - `node`: [`NodeContainer`] wiring the adapters, drivers and sync loops

pub mod config;
pub mod node;

pub use config::{ConfigError, CrossShardSection, NodeConfig, NodeRole, NodeSection, MAX_ACTIVE_SHARDS};
pub use node::{NodeContainer, NodeError, RunningNode};
