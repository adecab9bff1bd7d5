//! Service layer: batch processing and snapshot publication.

mod processor;
mod store;

#[cfg(test)]
mod tests;

pub use processor::InstructionProcessor;
pub use store::CommitteeStateStore;
