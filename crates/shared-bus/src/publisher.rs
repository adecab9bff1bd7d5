//! # Event Publisher
//!
//! Publishing side of the event bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::events::{EventFilter, EventTopic, NodeEvent};
use crate::subscriber::Subscription;
use crate::DEFAULT_CHANNEL_CAPACITY;

/// Live subscriptions by id.
pub(crate) type Registry = Arc<RwLock<HashMap<u64, EventFilter>>>;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event. Returns the number of subscribers that got it.
    async fn publish(&self, event: NodeEvent) -> usize;

    /// Total number of events published.
    fn events_published(&self) -> u64;
}

/// In-memory bus over `tokio::sync::broadcast`.
///
/// Every subscriber receives every event and filters locally, so the
/// receiver count returned by `publish` includes subscribers whose filter
/// then discards the event.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<NodeEvent>,
    registry: Registry,
    next_id: AtomicU64,
    events_published: AtomicU64,
    capacity: usize,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            registry: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            capacity,
        }
    }

    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let receiver = self.sender.subscribe();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut registry) = self.registry.write() {
            registry.insert(id, filter.clone());
        }
        debug!(id, topics = ?filter.topics, chains = ?filter.chains, "Subscription created");
        Subscription::new(id, receiver, filter, Arc::clone(&self.registry))
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Subscribers whose filter admits `topic`.
    #[must_use]
    pub fn subscribers_for(&self, topic: EventTopic) -> usize {
        let Ok(registry) = self.registry.read() else {
            return 0;
        };
        registry
            .values()
            .filter(|filter| {
                filter.topics.is_empty() || filter.topics.contains(&EventTopic::All) || filter.topics.contains(&topic)
            })
            .count()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: NodeEvent) -> usize {
        let topic = event.topic();
        self.events_published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(event) {
            Ok(receivers) => {
                trace!(?topic, receivers, "Event published");
                receivers
            }
            Err(_) => {
                trace!(?topic, "Event dropped, no subscribers");
                0
            }
        }
    }

    fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}
