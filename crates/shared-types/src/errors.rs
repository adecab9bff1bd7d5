//! # Error Types
//!
//! Errors shared by several subsystems.

use thiserror::Error;

/// Errors raised while decoding a validator key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The fingerprint is not valid base58.
    #[error("Invalid fingerprint encoding: {0}")]
    InvalidFingerprint(String),

    /// The decoded key bundle has the wrong size.
    #[error("Invalid key bundle length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Errors raised by the canonical encoders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Decoding failed: {0}")]
    Decode(String),

    /// Bytes decoded, but not in the one canonical form.
    #[error("Non-canonical encoding: {0}")]
    NonCanonical(String),
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        CodecError::Decode(err.to_string())
    }
}

/// Transport failures seen by the core. All of them are transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Network channel closed")]
    ChannelClosed,

    #[error("Network request timed out")]
    Timeout,
}
