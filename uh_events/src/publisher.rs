//! ABOUTME: Event publisher that serializes events and hands them to the broker
//! ABOUTME: One attempt per call; retry lives in a separate wrapper

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uh_core::PipelineMetrics;

use crate::broker::Broker;
use crate::Event;

/// Errors that can occur while publishing an event
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sends events into the broker
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<(), PublishError>;

    /// Name for logging
    fn name(&self) -> &str;
}

/// Publisher bound to one exchange of a broker
pub struct BrokerPublisher {
    broker: Arc<dyn Broker>,
    exchange: String,
    metrics: PipelineMetrics,
}

impl BrokerPublisher {
    pub fn new(broker: Arc<dyn Broker>, exchange: impl Into<String>, metrics: PipelineMetrics) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
            metrics,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }
}

#[async_trait]
impl Publisher for BrokerPublisher {
    async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        let routing_key = event.routing_key();
        let payload = event.to_json().map_err(|e| {
            self.metrics.publish_failures.inc();
            PublishError::from(e)
        })?;

        match self
            .broker
            .publish(&self.exchange, routing_key, Bytes::from(payload))
            .await
        {
            Ok(()) => {
                self.metrics.events_published.inc();
                debug!(exchange = %self.exchange, routing_key, "Event published");
                Ok(())
            }
            Err(e) => {
                self.metrics.publish_failures.inc();
                warn!(exchange = %self.exchange, routing_key, error = %e, "Event publish failed");
                Err(PublishError::BrokerUnavailable(e.to_string()))
            }
        }
    }

    fn name(&self) -> &str {
        self.broker.name()
    }
}
