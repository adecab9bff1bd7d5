//! # Core Domain Entities
//!
//! Identities shared by every subsystem.
//!
//! ## Clusters
//!
//! - **Chains**: `ChainId`, `ShardId`
//! - **Validators**: `ValidatorKey`, `Fingerprint`
//! - **Hashing**: `Hash`, `keccak256`, `committee_hash`

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha3::{Digest, Keccak256};

use crate::errors::KeyError;

/// A 32-byte Keccak-256 hash.
pub type Hash = [u8; 32];

/// Shard identifier. At most 256 shards are addressable.
pub type ShardId = u8;

/// Size of the incognito identity key.
pub const INCOGNITO_KEY_LEN: usize = 32;

/// Size of a compressed BLS12-381 G2 public key (min-sig scheme).
pub const MINING_KEY_LEN: usize = 96;

/// Size of a compressed secp256k1 public key.
pub const BRIDGE_KEY_LEN: usize = 33;

const KEY_BUNDLE_LEN: usize = INCOGNITO_KEY_LEN + MINING_KEY_LEN + BRIDGE_KEY_LEN;

/// Wire integer used for the beacon chain.
pub const BEACON_CHAIN_WIRE_ID: i32 = -1;

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    finalize(hasher)
}

/// Drain a Keccak-256 hasher into a [`Hash`].
pub fn finalize(hasher: Keccak256) -> Hash {
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// First eight hex digits of a hash, for log lines.
pub fn hex_short(hash: &Hash) -> String {
    hex::encode(&hash[..4])
}

/// Commitment to an ordered committee: Keccak-256 over the concatenated
/// fingerprints. The empty committee hashes the empty string.
pub fn committee_hash(keys: &[ValidatorKey]) -> Hash {
    let mut hasher = Keccak256::new();
    for key in keys {
        hasher.update(key.fingerprint().as_str().as_bytes());
    }
    finalize(hasher)
}

// =============================================================================
// CHAINS
// =============================================================================

/// The chain a block, driver or message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainId {
    Beacon,
    Shard(ShardId),
}

impl ChainId {
    pub fn is_beacon(&self) -> bool {
        matches!(self, ChainId::Beacon)
    }

    pub fn shard_id(&self) -> Option<ShardId> {
        match self {
            ChainId::Beacon => None,
            ChainId::Shard(sid) => Some(*sid),
        }
    }

    /// Integer form used on the wire (`-1` for the beacon chain).
    pub fn as_wire(&self) -> i32 {
        match self {
            ChainId::Beacon => BEACON_CHAIN_WIRE_ID,
            ChainId::Shard(sid) => i32::from(*sid),
        }
    }

    pub fn from_wire(value: i32) -> Option<Self> {
        if value == BEACON_CHAIN_WIRE_ID {
            return Some(ChainId::Beacon);
        }
        u8::try_from(value).ok().map(ChainId::Shard)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainId::Beacon => write!(f, "beacon"),
            ChainId::Shard(sid) => write!(f, "shard-{}", sid),
        }
    }
}

// =============================================================================
// VALIDATORS
// =============================================================================

/// Base58 encoding of a validator's key bundle. Ordering is plain string
/// ordering, which is the consensus tie-break order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Fingerprint(value)
    }
}

#[serde_as]
#[derive(Clone, Serialize, Deserialize)]
struct ValidatorKeyParts {
    incognito_key: [u8; INCOGNITO_KEY_LEN],
    #[serde_as(as = "Bytes")]
    mining_key: [u8; MINING_KEY_LEN],
    #[serde_as(as = "Bytes")]
    bridge_key: [u8; BRIDGE_KEY_LEN],
}

/// Immutable record of one validator.
///
/// The fingerprint encodes every byte of the bundle, so two keys with the
/// same fingerprint are byte-equal and a key can be rebuilt from its
/// fingerprint alone.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "ValidatorKeyParts", into = "ValidatorKeyParts")]
pub struct ValidatorKey {
    incognito_key: [u8; INCOGNITO_KEY_LEN],
    mining_key: [u8; MINING_KEY_LEN],
    bridge_key: [u8; BRIDGE_KEY_LEN],
    fingerprint: Fingerprint,
}

impl ValidatorKey {
    pub fn new(
        incognito_key: [u8; INCOGNITO_KEY_LEN],
        mining_key: [u8; MINING_KEY_LEN],
        bridge_key: [u8; BRIDGE_KEY_LEN],
    ) -> Self {
        let mut bundle = Vec::with_capacity(KEY_BUNDLE_LEN);
        bundle.extend_from_slice(&incognito_key);
        bundle.extend_from_slice(&mining_key);
        bundle.extend_from_slice(&bridge_key);
        let fingerprint = Fingerprint(bs58::encode(bundle).into_string());
        Self {
            incognito_key,
            mining_key,
            bridge_key,
            fingerprint,
        }
    }

    /// Rebuild a key from its fingerprint.
    pub fn from_fingerprint(fingerprint: &str) -> Result<Self, KeyError> {
        let bytes = bs58::decode(fingerprint)
            .into_vec()
            .map_err(|e| KeyError::InvalidFingerprint(e.to_string()))?;
        if bytes.len() != KEY_BUNDLE_LEN {
            return Err(KeyError::InvalidLength {
                expected: KEY_BUNDLE_LEN,
                actual: bytes.len(),
            });
        }

        let mut incognito_key = [0u8; INCOGNITO_KEY_LEN];
        let mut mining_key = [0u8; MINING_KEY_LEN];
        let mut bridge_key = [0u8; BRIDGE_KEY_LEN];
        incognito_key.copy_from_slice(&bytes[..INCOGNITO_KEY_LEN]);
        mining_key.copy_from_slice(&bytes[INCOGNITO_KEY_LEN..INCOGNITO_KEY_LEN + MINING_KEY_LEN]);
        bridge_key.copy_from_slice(&bytes[INCOGNITO_KEY_LEN + MINING_KEY_LEN..]);
        Ok(Self::new(incognito_key, mining_key, bridge_key))
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn incognito_key(&self) -> &[u8; INCOGNITO_KEY_LEN] {
        &self.incognito_key
    }

    pub fn mining_key(&self) -> &[u8; MINING_KEY_LEN] {
        &self.mining_key
    }

    pub fn bridge_key(&self) -> &[u8; BRIDGE_KEY_LEN] {
        &self.bridge_key
    }
}

impl From<ValidatorKeyParts> for ValidatorKey {
    fn from(parts: ValidatorKeyParts) -> Self {
        ValidatorKey::new(parts.incognito_key, parts.mining_key, parts.bridge_key)
    }
}

impl From<ValidatorKey> for ValidatorKeyParts {
    fn from(key: ValidatorKey) -> Self {
        ValidatorKeyParts {
            incognito_key: key.incognito_key,
            mining_key: key.mining_key,
            bridge_key: key.bridge_key,
        }
    }
}

impl PartialEq for ValidatorKey {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for ValidatorKey {}

impl std::hash::Hash for ValidatorKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

impl PartialOrd for ValidatorKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ValidatorKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fingerprint.cmp(&other.fingerprint)
    }
}

impl fmt::Debug for ValidatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValidatorKey")
            .field(&self.fingerprint.short())
            .finish()
    }
}
