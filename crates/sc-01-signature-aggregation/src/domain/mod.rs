//! Domain layer: keys, signature values and errors.

pub mod aggregate;
pub mod errors;
pub mod keys;
