//! # Node Runtime Library
//!
//! This library exposes the internal modules of the node runtime for testing.
//! The main entry point is the `main.rs` binary.
//!
//! ## Modules
//!
//! - `container/` - Node configuration and component wiring
//! - `genesis/` - Deterministic genesis committees
//! - `adapters/` - In-memory chains, loopback network, cross-shard views
//! - `orchestrator/` - One BFT driver per validated chain
//! - `handlers/` - Beacon instructions into committee state
//! - `metrics` - Node-level Prometheus recording

#![allow(clippy::type_complexity)]

pub mod adapters;
pub mod container;
pub mod genesis;
pub mod handlers;
pub mod metrics;
pub mod orchestrator;

pub use container::{ConfigError, NodeConfig, NodeContainer, NodeError, NodeRole, RunningNode};
pub use orchestrator::{ChainSelection, ConsensusOrchestrator, DriverFactory, RouteOutcome};
