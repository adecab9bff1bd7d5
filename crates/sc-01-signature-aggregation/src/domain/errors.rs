//! # Aggregation Errors

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AggregationError {
    /// A secret or public key cannot be decoded or derived.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The partial signature at `index` does not verify.
    #[error("Bad signature from committee index {index}")]
    BadSig { index: usize },

    #[error("Committee index {index} out of range (committee size {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Duplicate signer at committee index {0}")]
    DuplicateSigner(usize),

    #[error("Insufficient quorum: {signers} signers, {required} required")]
    InsufficientQuorum { signers: usize, required: usize },

    #[error("Bitmap covers {actual} validators, committee has {expected}")]
    MalformedBitmap { expected: usize, actual: usize },

    /// The combined signature does not verify against the selected keys.
    #[error("Aggregate signature does not verify")]
    BadAggregate,

    #[error("Cannot aggregate an empty signature list")]
    EmptyAggregation,

    #[error("Bad bridge signature: {0}")]
    BadBridgeSig(String),
}

pub type AggregationResult<T> = Result<T, AggregationError>;
