//! # Signature Aggregator
//!
//! Stateless implementation of [`MultiSignature`] over `blst` min-sig,
//! plus bridge (secp256k1) signing and a parallel batch verifier.
//!
//! Aggregates are checked with `fast_aggregate_verify`, which is only sound
//! against rogue-key attacks when every committee key has proven possession
//! of its secret. Key registration is expected to enforce that; here keys are
//! only checked to be valid non-identity subgroup points.

use bitvec::prelude::*;
use blst::min_sig::{AggregateSignature, PublicKey, Signature};
use blst::BLST_ERROR;
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature as EcdsaSignature, VerifyingKey};
use rayon::prelude::*;
use tracing::trace;

use shared_types::{Hash, ValidatorKey};

use crate::domain::aggregate::{quorum_threshold, AggregateSig, PartialSig};
use crate::domain::errors::{AggregationError, AggregationResult};
use crate::domain::keys::{BridgeKey, MiningKey};
use crate::ports::inbound::MultiSignature;

/// Domain Separation Tag (proof-of-possession ciphersuite).
const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureAggregator;

impl SignatureAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Verify many partial signatures in parallel. Results are returned in
    /// input order.
    pub fn verify_partials_batch(
        &self,
        digest: &Hash,
        committee: &[ValidatorKey],
        sigs: &[(usize, PartialSig)],
    ) -> Vec<AggregationResult<()>> {
        sigs.par_iter()
            .map(|(index, sig)| self.verify_partial(digest, committee, *index, sig))
            .collect()
    }

    /// secp256k1 ECDSA signature over the digest (64-byte compact form).
    pub fn sign_bridge(&self, digest: &Hash, key: &BridgeKey) -> AggregationResult<Vec<u8>> {
        let signing = key.signing_key()?;
        let signature: EcdsaSignature = signing
            .sign_prehash(digest)
            .map_err(|e| AggregationError::BadBridgeSig(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    pub fn verify_bridge(
        &self,
        digest: &Hash,
        signer: &ValidatorKey,
        signature: &[u8],
    ) -> AggregationResult<()> {
        let verifying = VerifyingKey::from_sec1_bytes(signer.bridge_key())
            .map_err(|e| AggregationError::InvalidKey(format!("bridge key: {}", e)))?;
        let signature = EcdsaSignature::from_slice(signature)
            .map_err(|e| AggregationError::BadBridgeSig(e.to_string()))?;
        verifying
            .verify_prehash(digest, &signature)
            .map_err(|e| AggregationError::BadBridgeSig(e.to_string()))
    }
}

fn parse_public_key(key: &ValidatorKey) -> AggregationResult<PublicKey> {
    PublicKey::key_validate(key.mining_key()).map_err(|e| {
        AggregationError::InvalidKey(format!("mining key {}: {:?}", key.fingerprint().short(), e))
    })
}

impl MultiSignature for SignatureAggregator {
    fn sign(&self, digest: &Hash, key: &MiningKey) -> AggregationResult<PartialSig> {
        let sk = key.secret_key()?;
        Ok(PartialSig(sk.sign(digest, DST, &[]).to_bytes()))
    }

    fn verify_partial(
        &self,
        digest: &Hash,
        committee: &[ValidatorKey],
        index: usize,
        sig: &PartialSig,
    ) -> AggregationResult<()> {
        let member = committee.get(index).ok_or(AggregationError::IndexOutOfRange {
            index,
            len: committee.len(),
        })?;
        let pk = parse_public_key(member)?;
        let signature =
            Signature::from_bytes(&sig.0).map_err(|_| AggregationError::BadSig { index })?;

        match signature.verify(true, digest, DST, &[], &pk, true) {
            BLST_ERROR::BLST_SUCCESS => Ok(()),
            err => {
                trace!(index, error = ?err, "Partial signature rejected");
                Err(AggregationError::BadSig { index })
            }
        }
    }

    fn aggregate(
        &self,
        _digest: &Hash,
        committee: &[ValidatorKey],
        sigs: &[(usize, PartialSig)],
    ) -> AggregationResult<AggregateSig> {
        if sigs.is_empty() {
            return Err(AggregationError::EmptyAggregation);
        }

        let mut bitmap = bitvec![u8, Lsb0; 0; committee.len()];
        let mut parsed = Vec::with_capacity(sigs.len());
        for (index, sig) in sigs {
            let index = *index;
            if index >= committee.len() {
                return Err(AggregationError::IndexOutOfRange {
                    index,
                    len: committee.len(),
                });
            }
            if bitmap[index] {
                return Err(AggregationError::DuplicateSigner(index));
            }
            bitmap.set(index, true);
            parsed.push(
                Signature::from_bytes(&sig.0).map_err(|_| AggregationError::BadSig { index })?,
            );
        }

        let refs: Vec<&Signature> = parsed.iter().collect();
        let combined = AggregateSignature::aggregate(&refs, true)
            .map_err(|_| AggregationError::BadAggregate)?
            .to_signature()
            .to_bytes();

        Ok(AggregateSig { combined, bitmap })
    }

    fn verify_aggregate(
        &self,
        digest: &Hash,
        committee: &[ValidatorKey],
        aggregate: &AggregateSig,
    ) -> AggregationResult<()> {
        if aggregate.bitmap.len() != committee.len() {
            return Err(AggregationError::MalformedBitmap {
                expected: committee.len(),
                actual: aggregate.bitmap.len(),
            });
        }

        let signers = aggregate.signer_count();
        let required = quorum_threshold(committee.len());
        if signers < required {
            return Err(AggregationError::InsufficientQuorum { signers, required });
        }

        let pks = aggregate
            .bitmap
            .iter_ones()
            .map(|i| parse_public_key(&committee[i]))
            .collect::<AggregationResult<Vec<_>>>()?;
        let pk_refs: Vec<&PublicKey> = pks.iter().collect();

        let combined =
            Signature::from_bytes(&aggregate.combined).map_err(|_| AggregationError::BadAggregate)?;

        match combined.fast_aggregate_verify(true, digest, DST, &pk_refs) {
            BLST_ERROR::BLST_SUCCESS => Ok(()),
            _ => Err(AggregationError::BadAggregate),
        }
    }
}
