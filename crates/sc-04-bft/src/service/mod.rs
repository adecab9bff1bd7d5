//! Service layer: the driver task and its inbox.

mod driver;
mod inbox;


pub use driver::{BftDriver, DriverHandle};
pub use inbox::{DriverInput, Inbox, PushOutcome};
