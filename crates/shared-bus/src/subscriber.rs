//! # Event Subscriber
//!
//! Subscription side of the event bus.

use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crate::events::{EventFilter, NodeEvent};
use crate::publisher::Registry;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Event bus closed")]
    Closed,
}

/// A subscription handle. Dropping it unregisters the subscriber.
pub struct Subscription {
    id: u64,
    receiver: broadcast::Receiver<NodeEvent>,
    filter: EventFilter,
    registry: Registry,
    missed: u64,
}

impl Subscription {
    pub(crate) fn new(id: u64, receiver: broadcast::Receiver<NodeEvent>, filter: EventFilter, registry: Registry) -> Self {
        Self {
            id,
            receiver,
            filter,
            registry,
            missed: 0,
        }
    }

    /// Next matching event, or `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<NodeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Closed) => return None,
                Err(RecvError::Lagged(count)) => self.lagged(count),
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Result<Option<NodeEvent>, SubscriptionError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Ok(Some(event)),
                Ok(_) => {}
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Closed) => return Err(SubscriptionError::Closed),
                Err(TryRecvError::Lagged(count)) => self.lagged(count),
            }
        }
    }

    /// Events lost to lagging since the subscription was created. Counts
    /// every overwritten event, matching the filter or not.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    fn lagged(&mut self, count: u64) {
        self.missed += count;
        warn!(id = self.id, lagged = count, topics = ?self.filter.topics, "Subscriber lagged, events dropped");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.write() {
            registry.remove(&self.id);
        }
        debug!(id = self.id, "Subscription dropped");
    }
}
