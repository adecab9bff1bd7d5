//! # Signature Values

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

use shared_types::ValidationData;

use super::errors::{AggregationError, AggregationResult};

/// Compressed G1 signature size.
pub const SIGNATURE_LEN: usize = 48;

/// Minimum number of signers for a committee of `n`: strictly more than
/// ⌊2n/3⌋. A committee of one needs its single key.
pub fn quorum_threshold(committee_len: usize) -> usize {
    committee_len * 2 / 3 + 1
}

/// One validator's signature over a digest.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSig(#[serde_as(as = "Bytes")] pub [u8; SIGNATURE_LEN]);

impl PartialSig {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; SIGNATURE_LEN] = bytes.try_into().ok()?;
        Some(PartialSig(array))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Combined signature and the committee indices that contributed.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSig {
    #[serde_as(as = "Bytes")]
    pub combined: [u8; SIGNATURE_LEN],
    pub bitmap: BitVec<u8, Lsb0>,
}

impl AggregateSig {
    pub fn signer_count(&self) -> usize {
        self.bitmap.count_ones()
    }

    pub fn signers(&self) -> Vec<usize> {
        self.bitmap.iter_ones().collect()
    }

    /// Attach to a block, with optional bridge signatures by index.
    pub fn to_validation_data(&self, bridge_signatures: Vec<(u32, Vec<u8>)>) -> ValidationData {
        ValidationData {
            aggregate_signature: self.combined.to_vec(),
            validator_bitmap: self.bitmap.as_raw_slice().to_vec(),
            committee_len: self.bitmap.len() as u32,
            bridge_signatures,
        }
    }

    pub fn from_validation_data(data: &ValidationData) -> AggregationResult<Self> {
        let combined: [u8; SIGNATURE_LEN] = data
            .aggregate_signature
            .as_slice()
            .try_into()
            .map_err(|_| AggregationError::BadAggregate)?;

        let committee_len = data.committee_len as usize;
        let mut bitmap = BitVec::<u8, Lsb0>::from_slice(&data.validator_bitmap);
        if bitmap.len() < committee_len {
            return Err(AggregationError::MalformedBitmap {
                expected: committee_len,
                actual: bitmap.len(),
            });
        }
        // Padding bits past the committee must be clear.
        if bitmap[committee_len..].any() {
            return Err(AggregationError::MalformedBitmap {
                expected: committee_len,
                actual: bitmap.last_one().map_or(0, |i| i + 1),
            });
        }
        bitmap.truncate(committee_len);

        Ok(Self { combined, bitmap })
    }
}
