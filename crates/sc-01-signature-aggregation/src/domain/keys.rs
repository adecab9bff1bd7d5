//! # Validator Secrets
//!
//! Secret material never leaves this module in parsed form. Secrets are
//! stored as raw bytes and parsed on use, so an invalid scalar surfaces as
//! `InvalidKey` at signing time instead of at load time.

use blst::min_sig::SecretKey;
use k256::ecdsa::SigningKey;
use sha3::{Digest, Keccak256};
use zeroize::Zeroize;

use shared_types::{ValidatorKey, BRIDGE_KEY_LEN, MINING_KEY_LEN};

use super::errors::{AggregationError, AggregationResult};

/// BLS secret scalar (big-endian, 32 bytes).
#[derive(Clone)]
pub struct MiningKey {
    secret: [u8; 32],
}

impl MiningKey {
    /// Derive a key from input keying material (at least 32 bytes).
    pub fn generate(ikm: &[u8]) -> AggregationResult<Self> {
        let sk = SecretKey::key_gen(ikm, &[])
            .map_err(|e| AggregationError::InvalidKey(format!("key_gen: {:?}", e)))?;
        Ok(Self {
            secret: sk.to_bytes(),
        })
    }

    /// Wrap raw secret bytes without validating them.
    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    pub(crate) fn secret_key(&self) -> AggregationResult<SecretKey> {
        SecretKey::from_bytes(&self.secret)
            .map_err(|e| AggregationError::InvalidKey(format!("mining secret: {:?}", e)))
    }

    pub fn public_key(&self) -> AggregationResult<[u8; MINING_KEY_LEN]> {
        Ok(self.secret_key()?.sk_to_pk().to_bytes())
    }
}

impl Drop for MiningKey {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// secp256k1 secret for bridge signatures.
#[derive(Clone)]
pub struct BridgeKey {
    secret: [u8; 32],
}

impl BridgeKey {
    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    pub(crate) fn signing_key(&self) -> AggregationResult<SigningKey> {
        SigningKey::from_slice(&self.secret)
            .map_err(|e| AggregationError::InvalidKey(format!("bridge secret: {}", e)))
    }

    /// Compressed SEC1 public key.
    pub fn public_key(&self) -> AggregationResult<[u8; BRIDGE_KEY_LEN]> {
        let signing = self.signing_key()?;
        let point = signing.verifying_key().to_encoded_point(true);
        let mut out = [0u8; BRIDGE_KEY_LEN];
        out.copy_from_slice(point.as_bytes());
        Ok(out)
    }
}

impl Drop for BridgeKey {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Everything a node needs to act as one validator.
#[derive(Clone)]
pub struct ValidatorSecrets {
    incognito_key: [u8; 32],
    pub mining: MiningKey,
    pub bridge: BridgeKey,
}

impl ValidatorSecrets {
    /// Deterministically derive all three keys from one seed.
    pub fn from_seed(seed: &[u8]) -> AggregationResult<Self> {
        let mining = MiningKey::generate(&tagged(seed, b"mining"))?;
        let bridge = BridgeKey::from_secret_bytes(tagged(seed, b"bridge"));
        // Rejects the (negligible) out-of-range scalar up front.
        bridge.signing_key()?;
        Ok(Self {
            incognito_key: tagged(seed, b"incognito"),
            mining,
            bridge,
        })
    }

    pub fn validator_key(&self) -> AggregationResult<ValidatorKey> {
        Ok(ValidatorKey::new(
            self.incognito_key,
            self.mining.public_key()?,
            self.bridge.public_key()?,
        ))
    }
}

fn tagged(seed: &[u8], tag: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(seed);
    hasher.update(tag);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}
