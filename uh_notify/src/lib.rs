//! ABOUTME: Live notification delivery: broker consumer and subscriber fan-out
//! ABOUTME: Moves user events from broker queues to every connected client

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use uh_events::Event;

pub mod consumer;
pub mod hub;

pub use consumer::{EventConsumer, MalformedPolicy};
pub use hub::{
    BroadcastReport, FanoutHub, HubSettings, SubscriberHandle, SubscriberId, SubscriberState,
};

/// Errors from pushing an event to a single subscriber
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Subscriber unreachable")]
    SubscriberUnreachable,
    #[error("Subscriber did not accept the event within {0:?}")]
    Timeout(Duration),
}

/// Destination of decoded events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn broadcast(&self, event: Event) -> BroadcastReport;
}
