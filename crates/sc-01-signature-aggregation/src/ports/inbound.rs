//! # Inbound Port
//!
//! The multi-signature contract consumed by consensus. All inputs are
//! explicit; implementations keep no state between calls.

use shared_types::{Hash, ValidatorKey};

use crate::domain::aggregate::{AggregateSig, PartialSig};
use crate::domain::errors::AggregationResult;
use crate::domain::keys::MiningKey;

pub trait MultiSignature: Send + Sync {
    /// Deterministic partial signature over `digest`.
    fn sign(&self, digest: &Hash, key: &MiningKey) -> AggregationResult<PartialSig>;

    /// Verify `sig` as committee member `index`'s signature over `digest`.
    fn verify_partial(
        &self,
        digest: &Hash,
        committee: &[ValidatorKey],
        index: usize,
        sig: &PartialSig,
    ) -> AggregationResult<()>;

    /// Combine partial signatures, one per committee index.
    fn aggregate(
        &self,
        digest: &Hash,
        committee: &[ValidatorKey],
        sigs: &[(usize, PartialSig)],
    ) -> AggregationResult<AggregateSig>;

    /// Succeeds iff the bitmap selects a quorum and the combined signature
    /// verifies against exactly the selected keys.
    fn verify_aggregate(
        &self,
        digest: &Hash,
        committee: &[ValidatorKey],
        aggregate: &AggregateSig,
    ) -> AggregationResult<()>;
}
