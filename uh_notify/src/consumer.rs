//! ABOUTME: Broker consumer that decodes queued messages and hands them to the hub
//! ABOUTME: One task per queue, sequential within a queue, acknowledging after broadcast

use bytes::Bytes;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uh_core::PipelineMetrics;
use uh_events::{decode, Broker, BrokerError, Delivery, Subscription};

use crate::EventSink;

/// What happens to a message that cannot be decoded
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MalformedPolicy {
    /// Log, acknowledge and discard
    #[default]
    Drop,
    /// Republish the raw bytes, then acknowledge
    DeadLetter {
        exchange: String,
        routing_key: String,
    },
}

/// Consumes named queues and forwards decoded events to a sink
#[derive(Clone)]
pub struct EventConsumer {
    broker: Arc<dyn Broker>,
    sink: Arc<dyn EventSink>,
    queues: Vec<String>,
    policy: MalformedPolicy,
    metrics: PipelineMetrics,
}

impl EventConsumer {
    pub fn new(
        broker: Arc<dyn Broker>,
        sink: Arc<dyn EventSink>,
        queues: Vec<String>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            broker,
            sink,
            queues,
            policy: MalformedPolicy::default(),
            metrics,
        }
    }

    pub fn with_malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// Attach to every queue and spawn one worker each.
    ///
    /// Fails without spawning anything if any queue cannot be consumed.
    pub async fn start(&self, cancel: CancellationToken) -> Result<Vec<JoinHandle<()>>, BrokerError> {
        let mut subscriptions = Vec::with_capacity(self.queues.len());
        for queue in &self.queues {
            subscriptions.push((queue.clone(), self.broker.consume(queue).await?));
        }

        let handles = subscriptions
            .into_iter()
            .map(|(queue, subscription)| {
                let consumer = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { consumer.run(queue, subscription, cancel).await })
            })
            .collect();

        info!(
            broker = self.broker.name(),
            queues = ?self.queues,
            "Event consumer started"
        );
        Ok(handles)
    }

    async fn run(
        &self,
        queue: String,
        mut subscription: Box<dyn Subscription>,
        cancel: CancellationToken,
    ) {
        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(queue = %queue, "Consumer stopping");
                    break;
                }
                next = subscription.next() => match next {
                    Some(delivery) => delivery,
                    None => {
                        info!(queue = %queue, "Queue subscription ended");
                        break;
                    }
                },
            };

            self.handle(&queue, delivery).await;
        }
    }

    /// Process one delivery; always settles it
    pub async fn handle(&self, queue: &str, delivery: Delivery) {
        self.metrics.messages_consumed.inc();

        match decode(delivery.payload()) {
            Ok(event) => {
                let routing_key = event.routing_key();
                let report = self.sink.broadcast(event).await;
                debug!(
                    queue,
                    routing_key,
                    redelivered = delivery.redelivered(),
                    delivered = report.delivered,
                    "Event forwarded to subscribers"
                );
            }
            Err(e) => {
                self.metrics.messages_malformed.inc();
                warn!(
                    queue,
                    routing_key = %delivery.routing_key(),
                    error = %e,
                    "Discarding malformed message"
                );
                self.dead_letter(queue, delivery.payload().clone()).await;
            }
        }

        delivery.ack();
    }

    async fn dead_letter(&self, queue: &str, payload: Bytes) {
        if let MalformedPolicy::DeadLetter {
            exchange,
            routing_key,
        } = &self.policy
        {
            match self.broker.publish(exchange, routing_key, payload).await {
                Ok(()) => debug!(queue, routing_key = %routing_key, "Malformed message dead-lettered"),
                Err(e) => error!(queue, error = %e, "Failed to dead-letter malformed message"),
            }
        }
    }
}
