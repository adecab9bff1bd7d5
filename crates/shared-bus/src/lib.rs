//! # Shared Bus - In-Process Event Bus
//!
//! Subsystems never call each other to announce facts; they publish a
//! [`NodeEvent`] and whoever cares subscribes.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────────────┐
//! │  BFT driver  │ BlockFinalized     │ instruction handler  │
//! │              │ ──────┐            │ (beacon blocks only) │
//! └──────────────┘       │            └──────────────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```
//!
//! Delivery is best effort: a subscriber that lags behind the channel
//! capacity loses the oldest events and is told how many it missed.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::{EventFilter, EventTopic, NodeEvent};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
