//! ABOUTME: Broker abstraction with exchanges, queues, bindings and acknowledgements
//! ABOUTME: Includes an in-process direct-exchange broker with at-least-once delivery

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Errors reported by a broker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),
}

/// A message as it sits in a queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub routing_key: String,
    pub payload: Bytes,
    /// Set when the message was handed out before and not acknowledged
    pub redelivered: bool,
}

/// Puts an unacknowledged message back on its queue
pub trait Requeue: Send + Sync {
    fn requeue(&self, message: Message);
}

/// A message handed to a consumer.
///
/// Must be settled with [`Delivery::ack`]. Dropping it unsettled, or calling
/// [`Delivery::requeue`], returns the message to the head of its queue.
pub struct Delivery {
    message: Message,
    settled: bool,
    origin: Arc<dyn Requeue>,
}

impl Delivery {
    pub fn new(message: Message, origin: Arc<dyn Requeue>) -> Self {
        Self {
            message,
            settled: false,
            origin,
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.message.routing_key
    }

    pub fn payload(&self) -> &Bytes {
        &self.message.payload
    }

    pub fn redelivered(&self) -> bool {
        self.message.redelivered
    }

    /// Acknowledge: the message is gone for good
    pub fn ack(mut self) {
        self.settled = true;
    }

    /// Give the message back for redelivery
    pub fn requeue(self) {
        drop(self);
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            let message = std::mem::take(&mut self.message);
            self.origin.requeue(message);
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("settled", &self.settled)
            .finish()
    }
}

/// Stream of deliveries from one queue
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery; `None` once the broker is closed
    async fn next(&mut self) -> Option<Delivery>;
}

/// Broker boundary used by the publisher, the consumer and startup topology
#[async_trait]
pub trait Broker: Send + Sync {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BrokerError>;

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
    ) -> Result<(), BrokerError>;

    async fn consume(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError>;

    /// Name for logging
    fn name(&self) -> &str;
}

/// Lock a std mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct QueueState {
    messages: Mutex<VecDeque<Message>>,
    notify: Notify,
    closed: AtomicBool,
    /// Oldest messages are discarded beyond this many
    max_depth: Option<usize>,
}

impl QueueState {
    fn with_max_depth(max_depth: Option<usize>) -> Self {
        Self {
            max_depth,
            ..Self::default()
        }
    }

    /// Enqueue, returning how many old messages were discarded to stay under the cap
    fn push_back(&self, message: Message) -> usize {
        let mut dropped = 0;
        {
            let mut messages = lock(&self.messages);
            messages.push_back(message);
            if let Some(max) = self.max_depth {
                while messages.len() > max {
                    messages.pop_front();
                    dropped += 1;
                }
            }
        }
        self.notify.notify_one();
        dropped
    }

    fn pop_front(&self) -> Option<Message> {
        lock(&self.messages).pop_front()
    }

    fn len(&self) -> usize {
        lock(&self.messages).len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Requeue for QueueState {
    fn requeue(&self, mut message: Message) {
        message.redelivered = true;
        debug!(routing_key = %message.routing_key, "Requeueing unacknowledged message");
        lock(&self.messages).push_front(message);
        self.notify.notify_one();
    }
}

struct InMemorySubscription {
    queue: Arc<QueueState>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Option<Delivery> {
        loop {
            let notified = self.queue.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a close between check and await is not missed
            notified.as_mut().enable();

            if self.queue.is_closed() {
                return None;
            }
            if let Some(message) = self.queue.pop_front() {
                let origin: Arc<dyn Requeue> = self.queue.clone();
                return Some(Delivery::new(message, origin));
            }

            notified.await;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    routing_key: String,
    queue: String,
}

/// In-process broker with direct-exchange routing.
///
/// Queues are FIFO and every binding whose routing key equals the published
/// key receives its own copy of the message. Queues are unbounded unless a
/// maximum depth is set, in which case the oldest messages make room.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    exchanges: DashSet<String>,
    queues: DashMap<String, Arc<QueueState>>,
    bindings: DashMap<String, Vec<Binding>>,
    closed: AtomicBool,
    max_queue_depth: Option<usize>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker whose queues keep at most `max` messages each
    pub fn with_max_queue_depth(max: usize) -> Self {
        Self {
            max_queue_depth: Some(max.max(1)),
            ..Self::default()
        }
    }

    /// Stop accepting work and end every open subscription
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for queue in self.queues.iter() {
            queue.value().close();
        }
        info!("In-memory broker closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Messages waiting in a queue, `None` if it was never declared
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(|q| q.len())
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Unavailable("broker is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if self.exchanges.insert(exchange.to_string()) {
            debug!(exchange, "Declared exchange");
        }
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.queues.entry(queue.to_string()).or_insert_with(|| {
            debug!(queue, "Declared queue");
            Arc::new(QueueState::with_max_depth(self.max_queue_depth))
        });
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if !self.exchanges.contains(exchange) {
            return Err(BrokerError::UnknownExchange(exchange.to_string()));
        }
        if !self.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }

        let binding = Binding {
            routing_key: routing_key.to_string(),
            queue: queue.to_string(),
        };
        let mut bindings = self.bindings.entry(exchange.to_string()).or_default();
        if !bindings.contains(&binding) {
            bindings.push(binding);
            debug!(exchange, queue, routing_key, "Bound queue");
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if !self.exchanges.contains(exchange) {
            return Err(BrokerError::UnknownExchange(exchange.to_string()));
        }

        let targets: Vec<String> = self
            .bindings
            .get(exchange)
            .map(|bindings| {
                bindings
                    .iter()
                    .filter(|b| b.routing_key == routing_key)
                    .map(|b| b.queue.clone())
                    .collect()
            })
            .unwrap_or_default();

        if targets.is_empty() {
            warn!(exchange, routing_key, "Unroutable message dropped");
            return Ok(());
        }

        for name in targets {
            if let Some(queue) = self.queues.get(&name) {
                let dropped = queue.push_back(Message {
                    routing_key: routing_key.to_string(),
                    payload: payload.clone(),
                    redelivered: false,
                });
                if dropped > 0 {
                    warn!(queue = %name, dropped, "Queue full, discarded oldest messages");
                }
                debug!(exchange, routing_key, queue = %name, "Message enqueued");
            }
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        self.ensure_open()?;
        let state = self
            .queues
            .get(queue)
            .map(|q| q.value().clone())
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;

        debug!(queue, "Consumer attached");
        Ok(Box::new(InMemorySubscription { queue: state }))
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
