//! # Signature Aggregation Subsystem
//!
//! BLS12-381 multi-signatures for a fixed, ordered committee.
//!
//! ## Contract
//!
//! | Operation | Result |
//! |-----------|--------|
//! | `sign(digest, key)` | deterministic 48-byte partial signature |
//! | `verify_partial(digest, committee, index, sig)` | `BadSig` / `IndexOutOfRange` on failure |
//! | `aggregate(digest, committee, sigs)` | combined signature + signer bitmap |
//! | `verify_aggregate(digest, committee, agg)` | needs more than ⌊2n/3⌋ signers |
//!
//! The aggregator holds no per-round state; every input is explicit.
//!
//! ## Scheme
//!
//! `blst` min-sig variant: signatures on G1 (48 bytes), public keys on G2
//! (96 bytes), proof-of-possession ciphersuite. A secondary secp256k1
//! "bridge" signature (`k256`) can ride along with each vote.

pub mod domain;
pub mod ports;
pub mod service;

pub use domain::aggregate::{quorum_threshold, AggregateSig, PartialSig};
pub use domain::errors::{AggregationError, AggregationResult};
pub use domain::keys::{BridgeKey, MiningKey, ValidatorSecrets};
pub use ports::inbound::MultiSignature;
pub use service::SignatureAggregator;
