//! ABOUTME: Declarative exchange and queue layout applied at startup
//! ABOUTME: Declares the exchange, each queue and its binding before consumers attach

use crate::broker::{Broker, BrokerError};
use tracing::info;

/// One queue and the routing key it is bound with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub routing_key: String,
}

impl QueueBinding {
    pub fn new(queue: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }
}

/// A single exchange with its bound queues
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub bindings: Vec<QueueBinding>,
}

impl Topology {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            bindings: Vec::new(),
        }
    }

    pub fn bind(mut self, queue: impl Into<String>, routing_key: impl Into<String>) -> Self {
        self.bindings.push(QueueBinding::new(queue, routing_key));
        self
    }

    /// Queue names in declaration order
    pub fn queues(&self) -> Vec<String> {
        self.bindings.iter().map(|b| b.queue.clone()).collect()
    }

    /// Declare everything on the broker; safe to repeat
    pub async fn declare(&self, broker: &dyn Broker) -> Result<(), BrokerError> {
        broker.declare_exchange(&self.exchange).await?;
        for binding in &self.bindings {
            broker.declare_queue(&binding.queue).await?;
            broker
                .bind_queue(&binding.queue, &self.exchange, &binding.routing_key)
                .await?;
        }

        info!(
            broker = broker.name(),
            exchange = %self.exchange,
            queues = self.bindings.len(),
            "Broker topology declared"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBroker;
    use bytes::Bytes;

    #[tokio::test]
    async fn declared_topology_routes_by_key() {
        let broker = InMemoryBroker::new();
        let topology = Topology::new("user.exchange")
            .bind("user.created.queue", "user.created")
            .bind("user.creation.failed.queue", "user.created.failed");

        topology.declare(&broker).await.unwrap();
        topology.declare(&broker).await.unwrap();

        broker
            .publish("user.exchange", "user.created.failed", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        assert_eq!(broker.queue_depth("user.created.queue"), Some(0));
        assert_eq!(broker.queue_depth("user.creation.failed.queue"), Some(1));
        assert_eq!(
            topology.queues(),
            vec!["user.created.queue", "user.creation.failed.queue"]
        );
    }
}
