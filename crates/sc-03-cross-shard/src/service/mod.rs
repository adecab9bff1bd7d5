//! Service layer: the per-shard sync actor.

mod sync;


pub use sync::{CrossShardSyncProcess, SyncCommand, SyncHandle, SyncStatus};
