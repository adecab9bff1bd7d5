//! # Outbound Ports (Driven Ports)
//!
//! Block and snapshot persistence needed for bootstrap and historical
//! validation.
//!
//! Production backends live outside this crate.
//! Testing and devnet: `InMemoryStateStore` (below).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use shared_types::{hex_short, Block, ChainId, Hash};

use crate::domain::errors::StoreError;
use crate::domain::state::CommitteeState;

/// Append-only block storage plus committee snapshots keyed by
/// `(chain, height)`.
pub trait StateStore: Send + Sync {
    /// Store a block. Re-storing the same block is a no-op; a different
    /// block at an occupied height is a conflict.
    fn put_block(&self, block: Block) -> Result<(), StoreError>;

    fn block_by_height(&self, chain: ChainId, height: u64) -> Result<Option<Block>, StoreError>;

    fn block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, StoreError>;

    fn put_committee_snapshot(
        &self,
        chain: ChainId,
        height: u64,
        state: Arc<CommitteeState>,
    ) -> Result<(), StoreError>;

    /// Latest snapshot taken at or below `height`.
    fn committee_snapshot(
        &self,
        chain: ChainId,
        height: u64,
    ) -> Result<Option<Arc<CommitteeState>>, StoreError>;

    fn latest_committee_snapshot(
        &self,
        chain: ChainId,
    ) -> Result<Option<(u64, Arc<CommitteeState>)>, StoreError> {
        Ok(self
            .committee_snapshot(chain, u64::MAX)?
            .map(|state| (state.height(), state)))
    }
}

#[derive(Default)]
struct Inner {
    blocks: HashMap<Hash, Block>,
    by_height: BTreeMap<(ChainId, u64), Hash>,
    snapshots: BTreeMap<(ChainId, u64), Arc<CommitteeState>>,
}

/// Map-backed store.
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: RwLock<Inner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_count(&self) -> usize {
        self.inner.read().blocks.len()
    }
}

impl StateStore for InMemoryStateStore {
    fn put_block(&self, block: Block) -> Result<(), StoreError> {
        let hash = block.hash();
        let key = (block.chain(), block.height());
        let mut inner = self.inner.write();
        match inner.by_height.get(&key) {
            Some(existing) if *existing == hash => return Ok(()),
            Some(existing) => {
                return Err(StoreError::Conflict {
                    chain: key.0,
                    height: key.1,
                    stored: hex_short(existing),
                })
            }
            None => {}
        }
        inner.by_height.insert(key, hash);
        inner.blocks.insert(hash, block);
        Ok(())
    }

    fn block_by_height(&self, chain: ChainId, height: u64) -> Result<Option<Block>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .by_height
            .get(&(chain, height))
            .and_then(|hash| inner.blocks.get(hash))
            .cloned())
    }

    fn block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        Ok(self.inner.read().blocks.get(hash).cloned())
    }

    fn put_committee_snapshot(
        &self,
        chain: ChainId,
        height: u64,
        state: Arc<CommitteeState>,
    ) -> Result<(), StoreError> {
        self.inner.write().snapshots.insert((chain, height), state);
        Ok(())
    }

    fn committee_snapshot(
        &self,
        chain: ChainId,
        height: u64,
    ) -> Result<Option<Arc<CommitteeState>>, StoreError> {
        Ok(self
            .inner
            .read()
            .snapshots
            .range((chain, 0)..=(chain, height))
            .next_back()
            .map(|(_, state)| Arc::clone(state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{BlockHeader, Fingerprint};

    fn block(height: u64, timestamp: i64) -> Block {
        Block {
            header: BlockHeader {
                chain: ChainId::Beacon,
                version: 1,
                height,
                round: 1,
                epoch: 1,
                timestamp,
                previous_hash: [0; 32],
                proposer: Fingerprint::from("p".to_string()),
                committee_root: [0; 32],
                body_root: [0; 32],
                cross_shard_root: [0; 32],
                beacon_height: 0,
            },
            body: Vec::new(),
            validation: None,
        }
    }

    #[test]
    fn test_blocks_are_append_only() {
        let store = InMemoryStateStore::new();
        let b = block(1, 10);
        store.put_block(b.clone()).unwrap();
        store.put_block(b.clone()).unwrap();
        assert_eq!(store.block_count(), 1);
        assert!(matches!(
            store.put_block(block(1, 11)),
            Err(StoreError::Conflict { height: 1, .. })
        ));
        assert_eq!(store.block_by_height(ChainId::Beacon, 1).unwrap(), Some(b.clone()));
        assert_eq!(store.block_by_hash(&b.hash()).unwrap(), Some(b));
        assert_eq!(store.block_by_height(ChainId::Shard(0), 1).unwrap(), None);
    }

    #[test]
    fn test_snapshot_lookup_at_or_below() {
        let store = InMemoryStateStore::new();
        let mut s5 = CommitteeState::new(1);
        s5.scalars.height = 5;
        let mut s9 = CommitteeState::new(1);
        s9.scalars.height = 9;
        store.put_committee_snapshot(ChainId::Beacon, 5, Arc::new(s5)).unwrap();
        store.put_committee_snapshot(ChainId::Beacon, 9, Arc::new(s9)).unwrap();

        assert!(store.committee_snapshot(ChainId::Beacon, 4).unwrap().is_none());
        assert_eq!(store.committee_snapshot(ChainId::Beacon, 7).unwrap().unwrap().height(), 5);
        let (height, _) = store.latest_committee_snapshot(ChainId::Beacon).unwrap().unwrap();
        assert_eq!(height, 9);
    }
}
