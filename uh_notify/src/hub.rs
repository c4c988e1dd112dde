//! ABOUTME: Fan-out hub holding the registry of live subscribers
//! ABOUTME: Broadcasts each event to every active subscriber with a per-send timeout

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uh_core::{Id, PipelineMetrics};
use uh_events::Event;

use crate::{DeliveryError, EventSink};

pub type SubscriberId = Id;

/// Liveness of one subscriber.
///
/// `Connecting -> Active -> {Closing, TimedOut, Errored} -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscriberState {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    TimedOut = 3,
    Errored = 4,
    Closed = 5,
}

impl SubscriberState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SubscriberState::Connecting,
            1 => SubscriberState::Active,
            2 => SubscriberState::Closing,
            3 => SubscriberState::TimedOut,
            4 => SubscriberState::Errored,
            _ => SubscriberState::Closed,
        }
    }

    /// Whether this state ends the subscription
    pub fn is_terminal_cause(self) -> bool {
        matches!(
            self,
            SubscriberState::Closing | SubscriberState::TimedOut | SubscriberState::Errored
        )
    }
}

impl std::fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubscriberState::Connecting => "connecting",
            SubscriberState::Active => "active",
            SubscriberState::Closing => "closing",
            SubscriberState::TimedOut => "timed_out",
            SubscriberState::Errored => "errored",
            SubscriberState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Hub tuning
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Upper bound on one push to one subscriber
    pub send_timeout: Duration,
    /// Per-subscriber channel capacity
    pub subscriber_buffer: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_millis(1000),
            subscriber_buffer: 32,
        }
    }
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that were active when the broadcast started
    pub attempted: usize,
    pub delivered: usize,
    /// Subscribers removed because their push failed
    pub removed: usize,
}

#[derive(Debug)]
struct SubscriberSlot {
    id: SubscriberId,
    state: AtomicU8,
    /// Cause recorded when the subscriber left, kept after the state turns `Closed`
    reason: AtomicU8,
    /// Taken on removal so the receiving side sees the channel end
    sender: Mutex<Option<mpsc::Sender<Arc<Event>>>>,
}

impl SubscriberSlot {
    fn state(&self) -> SubscriberState {
        SubscriberState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SubscriberState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn reason(&self) -> Option<SubscriberState> {
        let reason = SubscriberState::from_u8(self.reason.load(Ordering::SeqCst));
        reason.is_terminal_cause().then_some(reason)
    }

    fn sender(&self) -> Option<mpsc::Sender<Arc<Event>>> {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Walk through the cause to `Closed` and release the sender
    fn finish(&self, cause: SubscriberState) {
        self.reason.store(cause as u8, Ordering::SeqCst);
        self.set_state(cause);
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.set_state(SubscriberState::Closed);
    }

    async fn deliver(&self, event: Arc<Event>, timeout: Duration) -> Result<(), DeliveryError> {
        let sender = self.sender().ok_or(DeliveryError::SubscriberUnreachable)?;
        match tokio::time::timeout(timeout, sender.send(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryError::SubscriberUnreachable),
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        }
    }
}

#[derive(Debug)]
struct HubInner {
    registry: DashMap<SubscriberId, Arc<SubscriberSlot>>,
    settings: HubSettings,
    metrics: PipelineMetrics,
}

impl HubInner {
    /// Remove a subscriber; only the first caller for a given id wins
    fn remove(&self, id: &SubscriberId, cause: SubscriberState) -> bool {
        match self.registry.remove(id) {
            Some((_, slot)) => {
                slot.finish(cause);
                self.metrics.active_subscribers.dec();
                info!(
                    subscriber_id = %id,
                    cause = %cause,
                    remaining = self.registry.len(),
                    "Subscriber removed"
                );
                true
            }
            None => false,
        }
    }
}

/// Registry of live subscribers and the broadcaster over them.
///
/// Cloning shares the same registry.
#[derive(Debug, Clone)]
pub struct FanoutHub {
    inner: Arc<HubInner>,
}

impl FanoutHub {
    pub fn new(settings: HubSettings, metrics: PipelineMetrics) -> Self {
        Self {
            inner: Arc::new(HubInner {
                registry: DashMap::new(),
                settings,
                metrics,
            }),
        }
    }

    /// Add a subscriber and hand back its receiving end
    pub fn register(&self) -> SubscriberHandle {
        let (sender, receiver) = mpsc::channel(self.inner.settings.subscriber_buffer.max(1));
        let id = SubscriberId::new();
        let slot = Arc::new(SubscriberSlot {
            id: id.clone(),
            state: AtomicU8::new(SubscriberState::Connecting as u8),
            reason: AtomicU8::new(SubscriberState::Connecting as u8),
            sender: Mutex::new(Some(sender)),
        });

        self.inner.registry.insert(id.clone(), slot.clone());
        slot.set_state(SubscriberState::Active);
        self.inner.metrics.active_subscribers.inc();

        info!(
            subscriber_id = %id,
            active = self.inner.registry.len(),
            "Subscriber registered"
        );

        SubscriberHandle {
            slot,
            receiver,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber as a client disconnect. Returns false if it was already gone.
    pub fn unregister(&self, id: &SubscriberId) -> bool {
        self.inner.remove(id, SubscriberState::Closing)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.inner.registry.contains_key(id)
    }

    /// Push an event to every active subscriber concurrently
    pub async fn broadcast(&self, event: Event) -> BroadcastReport {
        self.inner.metrics.broadcasts.inc();

        // Snapshot first so removals during delivery cannot disturb iteration
        let targets: Vec<Arc<SubscriberSlot>> = self
            .inner
            .registry
            .iter()
            .filter(|entry| entry.value().state() == SubscriberState::Active)
            .map(|entry| entry.value().clone())
            .collect();

        if targets.is_empty() {
            debug!(routing_key = event.routing_key(), "No subscribers for event");
            return BroadcastReport::default();
        }

        let routing_key = event.routing_key();
        let event = Arc::new(event);
        let timeout = self.inner.settings.send_timeout;

        let results = join_all(targets.iter().map(|slot| {
            let event = event.clone();
            async move { (slot.id.clone(), slot.deliver(event, timeout).await) }
        }))
        .await;

        let mut report = BroadcastReport {
            attempted: targets.len(),
            ..Default::default()
        };

        for (id, result) in results {
            match result {
                Ok(()) => {
                    report.delivered += 1;
                    self.inner.metrics.deliveries.inc();
                }
                Err(e) => {
                    let cause = match e {
                        DeliveryError::SubscriberUnreachable => SubscriberState::Errored,
                        DeliveryError::Timeout(_) => SubscriberState::TimedOut,
                    };
                    if self.inner.remove(&id, cause) {
                        report.removed += 1;
                        self.inner.metrics.delivery_failures.inc();
                        warn!(subscriber_id = %id, routing_key, error = %e, "Delivery failed");
                    } else {
                        // Left the hub after the snapshot was taken
                        debug!(subscriber_id = %id, routing_key, "Subscriber already gone");
                    }
                }
            }
        }

        debug!(
            routing_key,
            attempted = report.attempted,
            delivered = report.delivered,
            removed = report.removed,
            "Broadcast complete"
        );
        report
    }
}

#[async_trait]
impl EventSink for FanoutHub {
    async fn broadcast(&self, event: Event) -> BroadcastReport {
        FanoutHub::broadcast(self, event).await
    }
}

/// Receiving end of one subscriber.
///
/// Dropping the handle unregisters the subscriber as a client disconnect.
#[derive(Debug)]
pub struct SubscriberHandle {
    slot: Arc<SubscriberSlot>,
    receiver: mpsc::Receiver<Arc<Event>>,
    hub: Weak<HubInner>,
}

impl SubscriberHandle {
    pub fn id(&self) -> &SubscriberId {
        &self.slot.id
    }

    pub fn state(&self) -> SubscriberState {
        self.slot.state()
    }

    /// Why the subscriber left, once it has
    pub fn close_reason(&self) -> Option<SubscriberState> {
        self.slot.reason()
    }

    /// Next event; `None` once the subscriber has been removed and drained
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.recv().await
    }

    /// Poll form of [`SubscriberHandle::recv`] for hand-written streams
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Arc<Event>>> {
        self.receiver.poll_recv(cx)
    }

    /// Stop accepting events without leaving the registry.
    ///
    /// The next push to this subscriber fails and the hub removes it.
    pub fn shutdown_receiver(&mut self) {
        self.receiver.close();
    }

    /// Leave the hub with the given cause; later calls are no-ops
    pub fn close(&mut self, cause: SubscriberState) {
        self.receiver.close();
        match self.hub.upgrade() {
            Some(hub) => {
                hub.remove(&self.slot.id, cause);
            }
            None => {
                if self.slot.state() != SubscriberState::Closed {
                    self.slot.finish(cause);
                }
            }
        }
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.close(SubscriberState::Closing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> FanoutHub {
        FanoutHub::new(HubSettings::default(), PipelineMetrics::new())
    }

    #[test]
    fn register_makes_subscriber_active() {
        let hub = hub();
        let handle = hub.register();
        assert_eq!(handle.state(), SubscriberState::Active);
        assert!(hub.contains(handle.id()));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn double_unregister_is_a_no_op() {
        let hub = hub();
        let handle = hub.register();
        let id = handle.id().clone();

        assert!(hub.unregister(&id));
        assert!(!hub.unregister(&id));
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(handle.state(), SubscriberState::Closed);
        assert_eq!(handle.close_reason(), Some(SubscriberState::Closing));
    }

    #[test]
    fn dropping_handle_unregisters() {
        let metrics = PipelineMetrics::new();
        let hub = FanoutHub::new(HubSettings::default(), metrics.clone());
        let handle = hub.register();
        assert_eq!(metrics.active_subscribers.get(), 1);

        drop(handle);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(metrics.active_subscribers.get(), 0);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_a_no_op() {
        let hub = hub();
        let report = hub.broadcast(Event::user_created("Al", "al@x.com")).await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn removed_subscriber_stream_ends() {
        let hub = hub();
        let mut handle = hub.register();
        hub.broadcast(Event::user_created("Al", "al@x.com")).await;
        hub.unregister(&handle.id().clone());

        // Buffered events drain, then the stream ends
        assert!(handle.recv().await.is_some());
        assert!(handle.recv().await.is_none());
    }

    #[tokio::test]
    async fn subscriber_leaving_mid_broadcast_is_not_a_failure() {
        let metrics = PipelineMetrics::new();
        let hub = FanoutHub::new(
            HubSettings {
                send_timeout: Duration::from_secs(5),
                subscriber_buffer: 1,
            },
            metrics.clone(),
        );
        let handle = hub.register();

        // Fill the only slot so the next push waits on the channel
        hub.broadcast(Event::user_created("Al", "al@x.com")).await;

        let broadcaster = hub.clone();
        let pending = tokio::spawn(async move {
            broadcaster
                .broadcast(Event::user_created("Bo", "bo@x.com"))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Client disconnects while the push is in flight
        drop(handle);
        let report = pending.await.unwrap();

        assert_eq!(report.attempted, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.removed, 0);
        assert_eq!(metrics.delivery_failures.get(), 0);
        assert_eq!(metrics.active_subscribers.get(), 0);
    }

    #[test]
    fn state_display_names() {
        assert_eq!(SubscriberState::TimedOut.to_string(), "timed_out");
        assert!(SubscriberState::Errored.is_terminal_cause());
        assert!(!SubscriberState::Closed.is_terminal_cause());
    }
}
