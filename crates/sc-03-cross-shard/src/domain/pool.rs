//! # Cross-Shard Pool
//!
//! Payloads received from other shards, keyed by source block hash and
//! content digest. Several pending candidates may claim the same source
//! block; at most one validated payload is held per block.
//!
//! ## Indices
//!
//! - `entries`: O(1) lookup by `(hash, digest)`
//! - `validated`: source block hash to the digest of its validated payload
//! - `by_height`: `(from_shard, height, hash, digest)` for ordered range queries
//! - `by_age`: insertion sequence for oldest-first eviction
//!
//! Entries are `Pending` until the sync process validates them against a
//! beacon confirmation. Queries only ever return `Validated` entries.
//! Pending entries older than the request deadline are dropped by
//! [`CrossShardPool::expire_pending`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shared_types::{keccak256, CrossShardPayload, Hash, ShardId};
use tokio::time::Instant;
use tracing::debug;

use super::config::PoolConfig;
use super::errors::{CrossShardError, CrossShardResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Validated,
}

/// `(source block hash, content digest)`.
type EntryKey = (Hash, Hash);

/// Digest over everything a payload carries beyond its header: the leaf
/// (destination, outputs) and the Merkle path.
fn content_digest(payload: &CrossShardPayload) -> Hash {
    let mut bytes = Vec::with_capacity(32 * (1 + payload.merkle_path.len()));
    bytes.extend_from_slice(&payload.leaf());
    for node in &payload.merkle_path {
        bytes.extend_from_slice(node);
    }
    keccak256(&bytes)
}

fn entry_key(payload: &CrossShardPayload) -> EntryKey {
    (payload.source_block_hash(), content_digest(payload))
}

#[derive(Debug)]
struct Entry {
    payload: Arc<CrossShardPayload>,
    from_shard: ShardId,
    status: EntryStatus,
    seq: u64,
    received_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<EntryKey, Entry>,
    validated: HashMap<Hash, Hash>,
    by_height: BTreeSet<(ShardId, u64, Hash, Hash)>,
    by_age: BTreeMap<u64, EntryKey>,
    next_seq: u64,
    pending: usize,
}

impl Inner {
    fn insert(&mut self, key: EntryKey, from_shard: ShardId, payload: CrossShardPayload, status: EntryStatus) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_height
            .insert((from_shard, payload.source_block_height(), key.0, key.1));
        self.by_age.insert(seq, key);
        match status {
            EntryStatus::Pending => self.pending += 1,
            EntryStatus::Validated => {
                self.validated.insert(key.0, key.1);
            }
        }
        self.entries.insert(
            key,
            Entry {
                payload: Arc::new(payload),
                from_shard,
                status,
                seq,
                received_at: Instant::now(),
            },
        );
    }

    fn remove(&mut self, key: &EntryKey) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.by_height
            .remove(&(entry.from_shard, entry.payload.source_block_height(), key.0, key.1));
        self.by_age.remove(&entry.seq);
        match entry.status {
            EntryStatus::Pending => self.pending -= 1,
            EntryStatus::Validated => {
                self.validated.remove(&key.0);
            }
        }
        Some(entry)
    }

    /// Keys of every entry, pending or validated, for source block `hash`.
    fn keys_for(&self, from_shard: ShardId, height: u64, hash: Hash) -> Vec<EntryKey> {
        self.by_height
            .range((from_shard, height, hash, [0u8; 32])..=(from_shard, height, hash, [0xffu8; 32]))
            .map(|(_, _, hash, digest)| (*hash, *digest))
            .collect()
    }

    /// Drop every pending candidate for `hash` except `keep`.
    fn drop_pending_for(&mut self, from_shard: ShardId, height: u64, hash: Hash, keep: Option<&EntryKey>) {
        for key in self.keys_for(from_shard, height, hash) {
            if Some(&key) == keep {
                continue;
            }
            if self.entries.get(&key).map(|e| e.status) == Some(EntryStatus::Pending) {
                self.remove(&key);
            }
        }
    }

    fn evict_over(&mut self, capacity: usize) {
        while self.entries.len() > capacity {
            let Some((_, oldest)) = self.by_age.pop_first() else { break };
            if let Some(entry) = self.remove(&oldest) {
                debug!(
                    from = entry.from_shard,
                    height = entry.payload.source_block_height(),
                    "[xshard] Evicted oldest payload"
                );
            }
        }
    }
}

/// Bounded, thread-safe store of cross-shard payloads.
#[derive(Debug)]
pub struct CrossShardPool {
    config: PoolConfig,
    inner: Mutex<Inner>,
}

fn source_shard(payload: &CrossShardPayload) -> CrossShardResult<ShardId> {
    payload.from_shard_id().ok_or_else(|| {
        CrossShardError::unverified(payload.source_block_height(), "source header is not a shard header")
    })
}

impl CrossShardPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Insert a validated payload. It replaces any pending candidates and
    /// any different validated payload for the same source block. Returns
    /// `false` when this exact payload was already held as validated.
    pub fn add(&self, payload: CrossShardPayload) -> CrossShardResult<bool> {
        let from = source_shard(&payload)?;
        let height = payload.source_block_height();
        let key = entry_key(&payload);
        let mut inner = self.inner.lock();
        if inner.validated.get(&key.0) == Some(&key.1) {
            return Ok(false);
        }
        for stale in inner.keys_for(from, height, key.0) {
            inner.remove(&stale);
        }
        inner.insert(key, from, payload, EntryStatus::Validated);
        inner.evict_over(self.config.capacity);
        Ok(true)
    }

    /// Insert a payload received from a peer, not yet validated. Idempotent
    /// on content; a different candidate for the same source block is kept
    /// alongside. Returns the source block hash.
    pub fn add_pending(&self, payload: CrossShardPayload) -> CrossShardResult<Hash> {
        let from = source_shard(&payload)?;
        let key = entry_key(&payload);
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&key) || inner.validated.contains_key(&key.0) {
            return Ok(key.0);
        }
        if inner.pending >= self.config.max_pending {
            return Err(CrossShardError::PoolFull {
                capacity: self.config.max_pending,
            });
        }
        inner.insert(key, from, payload, EntryStatus::Pending);
        inner.evict_over(self.config.capacity);
        Ok(key.0)
    }

    /// Promote this pending candidate and drop the other candidates for its
    /// source block. `false` if the candidate is not pending here.
    pub fn mark_validated(&self, payload: &CrossShardPayload) -> bool {
        let Some(from) = payload.from_shard_id() else { return false };
        let key = entry_key(payload);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.entries.get_mut(&key) {
            Some(entry) if entry.status == EntryStatus::Pending => {
                entry.status = EntryStatus::Validated;
                inner.pending -= 1;
                inner.validated.insert(key.0, key.1);
            }
            _ => return false,
        }
        inner.drop_pending_for(from, payload.source_block_height(), key.0, Some(&key));
        true
    }

    /// Drop a pending candidate that failed validation.
    pub fn reject_pending(&self, payload: &CrossShardPayload) -> bool {
        let key = entry_key(payload);
        let mut inner = self.inner.lock();
        let pending = inner
            .entries
            .get(&key)
            .map_or(false, |entry| entry.status == EntryStatus::Pending);
        pending && inner.remove(&key).is_some()
    }

    /// Drop pending candidates received at least `max_age` ago. Returns how
    /// many were dropped.
    pub fn expire_pending(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let stale: Vec<EntryKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.status == EntryStatus::Pending
                    && now.saturating_duration_since(entry.received_at) >= max_age
            })
            .map(|(key, _)| *key)
            .collect();
        for key in &stale {
            if let Some(entry) = inner.remove(key) {
                debug!(
                    from = entry.from_shard,
                    height = entry.payload.source_block_height(),
                    "[xshard] Expired pending payload"
                );
            }
        }
        stale.len()
    }

    /// Pending payloads claiming to come from `(from_shard, height)`.
    pub fn pending_at(&self, from_shard: ShardId, height: u64) -> Vec<Arc<CrossShardPayload>> {
        let inner = self.inner.lock();
        inner
            .by_height
            .range((from_shard, height, [0u8; 32], [0u8; 32])..=(from_shard, height, [0xffu8; 32], [0xffu8; 32]))
            .filter_map(|(_, _, hash, digest)| inner.entries.get(&(*hash, *digest)))
            .filter(|entry| entry.status == EntryStatus::Pending)
            .map(|entry| Arc::clone(&entry.payload))
            .collect()
    }

    /// `Validated` when a validated payload for this source block is held,
    /// `Pending` when only candidates are.
    pub fn status(&self, hash: &Hash) -> Option<EntryStatus> {
        let inner = self.inner.lock();
        if inner.validated.contains_key(hash) {
            return Some(EntryStatus::Validated);
        }
        inner
            .entries
            .keys()
            .any(|(block, _)| block == hash)
            .then_some(EntryStatus::Pending)
    }

    /// True when a validated payload with this hash is held.
    pub fn has(&self, hash: &Hash) -> bool {
        self.inner.lock().validated.contains_key(hash)
    }

    /// Validated payloads from `from_shard` with height in
    /// `[min_height, max_height]`, ascending. Nothing is removed.
    pub fn take(&self, from_shard: ShardId, min_height: u64, max_height: u64) -> Vec<Arc<CrossShardPayload>> {
        if min_height > max_height {
            return Vec::new();
        }
        let inner = self.inner.lock();
        inner
            .by_height
            .range(
                (from_shard, min_height, [0u8; 32], [0u8; 32])
                    ..=(from_shard, max_height, [0xffu8; 32], [0xffu8; 32]),
            )
            .filter_map(|(_, _, hash, digest)| inner.entries.get(&(*hash, *digest)))
            .filter(|entry| entry.status == EntryStatus::Validated)
            .map(|entry| Arc::clone(&entry.payload))
            .collect()
    }

    /// Remove every payload from `from_shard` strictly below `below_height`.
    pub fn prune(&self, from_shard: ShardId, below_height: u64) -> usize {
        let mut inner = self.inner.lock();
        let doomed: Vec<EntryKey> = inner
            .by_height
            .range((from_shard, 0, [0u8; 32], [0u8; 32])..(from_shard, below_height, [0u8; 32], [0u8; 32]))
            .map(|(_, _, hash, digest)| (*hash, *digest))
            .collect();
        for key in &doomed {
            inner.remove(key);
        }
        doomed.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending
    }
}

impl Default for CrossShardPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::fixtures::payload;
    use proptest::prelude::*;
    use shared_types::Coin;

    fn heights(payloads: &[Arc<CrossShardPayload>]) -> Vec<u64> {
        payloads.iter().map(|p| p.source_block_height()).collect()
    }

    #[test]
    fn test_add_is_idempotent() {
        let pool = CrossShardPool::new(PoolConfig::for_testing());
        let p = payload(0, 1, 10);
        assert!(pool.add(p.clone()).unwrap());
        assert!(!pool.add(p.clone()).unwrap());
        assert_eq!(pool.len(), 1);
        assert!(pool.has(&p.source_block_hash()));
    }

    #[test]
    fn test_take_returns_validated_in_height_order() {
        let pool = CrossShardPool::new(PoolConfig::for_testing());
        for height in [12, 10, 11, 15] {
            pool.add(payload(0, 1, height)).unwrap();
        }
        pool.add(payload(2, 1, 11)).unwrap();
        pool.add_pending(payload(0, 1, 13)).unwrap();

        assert_eq!(heights(&pool.take(0, 10, 13)), vec![10, 11, 12]);
        assert_eq!(heights(&pool.take(2, 0, 100)), vec![11]);
        assert!(pool.take(0, 13, 12).is_empty());
        // take does not remove.
        assert_eq!(pool.take(0, 10, 13).len(), 3);
    }

    #[test]
    fn test_prune_is_strict() {
        let pool = CrossShardPool::new(PoolConfig::for_testing());
        for height in 9..=12 {
            pool.add(payload(0, 1, height)).unwrap();
        }
        pool.add(payload(1, 0, 5)).unwrap();

        assert_eq!(pool.prune(0, 11), 2);
        assert_eq!(heights(&pool.take(0, 0, 100)), vec![11, 12]);
        assert_eq!(pool.take(1, 0, 100).len(), 1);
    }

    #[test]
    fn test_pending_lifecycle() {
        let pool = CrossShardPool::new(PoolConfig::for_testing());
        let p = payload(0, 1, 10);
        let hash = pool.add_pending(p.clone()).unwrap();

        assert!(!pool.has(&hash));
        assert_eq!(pool.pending_len(), 1);
        assert_eq!(pool.pending_at(0, 10).len(), 1);
        assert!(pool.take(0, 10, 10).is_empty());

        assert!(pool.mark_validated(&p));
        assert!(!pool.mark_validated(&p));
        assert!(pool.has(&hash));
        assert_eq!(pool.pending_len(), 0);
        assert!(!pool.reject_pending(&p));

        let q = payload(0, 1, 11);
        let hash_q = pool.add_pending(q.clone()).unwrap();
        assert!(pool.reject_pending(&q));
        assert_eq!(pool.status(&hash_q), None);
    }

    fn forged(genuine: &CrossShardPayload) -> CrossShardPayload {
        let mut forged = genuine.clone();
        forged.output_coins = vec![Coin(vec![0xde, 0xad])];
        forged
    }

    #[test]
    fn test_forged_candidate_does_not_shadow_genuine() {
        let pool = CrossShardPool::new(PoolConfig::for_testing());
        let genuine = payload(0, 1, 10);
        let forged = forged(&genuine);
        let hash = genuine.source_block_hash();

        assert_eq!(pool.add_pending(forged.clone()).unwrap(), hash);
        assert_eq!(pool.add_pending(genuine.clone()).unwrap(), hash);
        let pending = pool.pending_at(0, 10);
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().any(|p| **p == genuine));
        assert_eq!(pool.status(&hash), Some(EntryStatus::Pending));

        assert!(pool.reject_pending(&forged));
        assert!(pool.mark_validated(&genuine));
        assert_eq!(pool.pending_len(), 0);
        let taken = pool.take(0, 10, 10);
        assert_eq!(taken.len(), 1);
        assert_eq!(*taken[0], genuine);
    }

    #[test]
    fn test_validating_one_candidate_drops_the_others() {
        let pool = CrossShardPool::new(PoolConfig::for_testing());
        let genuine = payload(0, 1, 10);
        pool.add_pending(forged(&genuine)).unwrap();
        pool.add_pending(genuine.clone()).unwrap();

        assert!(pool.mark_validated(&genuine));
        assert_eq!(pool.pending_len(), 0);
        assert!(pool.pending_at(0, 10).is_empty());
        // Further candidates for a validated block are ignored.
        pool.add_pending(forged(&genuine)).unwrap();
        assert_eq!(pool.pending_len(), 0);
    }

    #[test]
    fn test_add_replaces_pending_content() {
        let pool = CrossShardPool::new(PoolConfig::for_testing());
        let genuine = payload(0, 1, 10);
        pool.add_pending(forged(&genuine)).unwrap();

        assert!(pool.add(genuine.clone()).unwrap());
        assert_eq!(pool.pending_len(), 0);
        assert_eq!(pool.len(), 1);
        let taken = pool.take(0, 10, 10);
        assert_eq!(*taken[0], genuine);
        assert!(!pool.add(genuine).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_pending_expires_and_frees_room() {
        let pool = CrossShardPool::new(PoolConfig::for_testing());
        for height in 100..104 {
            pool.add_pending(payload(0, 1, height)).unwrap();
        }
        assert_eq!(
            pool.add_pending(payload(0, 1, 10)),
            Err(CrossShardError::PoolFull { capacity: 4 })
        );

        tokio::time::advance(Duration::from_secs(30)).await;
        pool.add(payload(2, 1, 7)).unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(pool.expire_pending(Duration::from_secs(60)), 4);
        assert_eq!(pool.pending_len(), 0);
        // Validated entries never expire.
        assert_eq!(pool.take(2, 0, 100).len(), 1);
        assert!(pool.add_pending(payload(0, 1, 10)).is_ok());
        assert_eq!(pool.expire_pending(Duration::from_secs(60)), 0);
    }

    #[test]
    fn test_pending_bound() {
        let pool = CrossShardPool::new(PoolConfig {
            capacity: 16,
            max_pending: 2,
        });
        pool.add_pending(payload(0, 1, 1)).unwrap();
        pool.add_pending(payload(0, 1, 2)).unwrap();
        assert_eq!(
            pool.add_pending(payload(0, 1, 3)),
            Err(CrossShardError::PoolFull { capacity: 2 })
        );
        // Re-adding a known payload is not a new pending entry.
        assert!(pool.add_pending(payload(0, 1, 2)).is_ok());
    }

    #[test]
    fn test_oldest_evicted_beyond_capacity() {
        let pool = CrossShardPool::new(PoolConfig {
            capacity: 3,
            max_pending: 3,
        });
        for height in 1..=4 {
            pool.add(payload(0, 1, height)).unwrap();
        }
        assert_eq!(pool.len(), 3);
        assert_eq!(heights(&pool.take(0, 0, 10)), vec![2, 3, 4]);
    }

    proptest! {
        #[test]
        fn prop_queries_never_return_pending(
            ops in proptest::collection::vec((any::<bool>(), 0u8..3, 1u64..20), 0..40)
        ) {
            let pool = CrossShardPool::new(PoolConfig { capacity: 64, max_pending: 64 });
            for (validated, from, height) in ops {
                let from = from % 2;
                let p = payload(from, 2, height);
                if validated {
                    pool.add(p).unwrap();
                } else {
                    pool.add_pending(p).unwrap();
                }
            }
            for from in 0..2u8 {
                let taken = pool.take(from, 0, u64::MAX);
                let hs = heights(&taken);
                prop_assert!(hs.windows(2).all(|w| w[0] <= w[1]));
                for p in taken {
                    prop_assert!(pool.has(&p.source_block_hash()));
                }
            }
        }
    }
}
