//! ABOUTME: Prometheus metrics for the notification pipeline
//! ABOUTME: Shared by the publisher, consumer and fan-out hub

use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Counters and gauges for the event pipeline.
///
/// Cloning shares the underlying atomics, so every component can hold its own
/// copy and the observability registry sees the same values.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    /// Events handed to the broker successfully
    pub events_published: Counter,
    /// Publish attempts that returned an error
    pub publish_failures: Counter,
    /// Messages taken off a queue by the consumer
    pub messages_consumed: Counter,
    /// Messages that failed to deserialize
    pub messages_malformed: Counter,
    /// Broadcast calls on the hub
    pub broadcasts: Counter,
    /// Successful pushes to individual subscribers
    pub deliveries: Counter,
    /// Pushes that failed and removed the subscriber
    pub delivery_failures: Counter,
    /// Subscribers currently in the registry
    pub active_subscribers: Gauge,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every metric under the given registry
    pub fn register(&self, registry: &mut Registry) {
        registry.register(
            "events_published",
            "Events published to the broker",
            self.events_published.clone(),
        );
        registry.register(
            "publish_failures",
            "Event publish attempts that failed",
            self.publish_failures.clone(),
        );
        registry.register(
            "messages_consumed",
            "Messages received from broker queues",
            self.messages_consumed.clone(),
        );
        registry.register(
            "messages_malformed",
            "Messages dropped because they could not be decoded",
            self.messages_malformed.clone(),
        );
        registry.register(
            "broadcasts",
            "Events broadcast to live subscribers",
            self.broadcasts.clone(),
        );
        registry.register(
            "deliveries",
            "Events pushed to individual subscribers",
            self.deliveries.clone(),
        );
        registry.register(
            "delivery_failures",
            "Subscriber pushes that failed",
            self.delivery_failures.clone(),
        );
        registry.register(
            "active_subscribers",
            "Live subscribers currently connected",
            self.active_subscribers.clone(),
        );
    }
}
