//! # Domain Layer
//!
//! Pool, request bookkeeping and validation. No I/O.

pub mod config;
pub mod errors;
pub mod pool;
pub mod request;

pub use config::{PoolConfig, SyncConfig};
pub use errors::{CrossShardError, CrossShardResult};
pub use pool::{CrossShardPool, EntryStatus};
pub use request::OutstandingRequest;
