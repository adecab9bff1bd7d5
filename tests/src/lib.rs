//! # Shardline Test Suite
//!
//! Scenarios that cross subsystem boundaries. Each subsystem crate keeps its
//! own unit tests; this crate wires real components together.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/integration/
//! │   ├── committee_flow.rs     # beacon blocks → committee state
//! │   ├── consensus_flow.rs     # multi-validator BFT over loopback
//! │   └── cross_shard_flow.rs   # shard outputs → beacon → sync → pool
//! └── benches/
//!     └── consensus_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p sc-tests
//! cargo test -p sc-tests integration::cross_shard_flow
//! cargo bench -p sc-tests
//! ```

pub mod integration;
