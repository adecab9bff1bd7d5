//! Ports layer.

pub mod inbound;
