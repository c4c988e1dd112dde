//! ABOUTME: Server-sent events endpoint streaming user events to live clients
//! ABOUTME: Each connection is one hub subscriber for as long as the response lives

use actix_web::{get, web, HttpResponse};
use bytes::Bytes;
use futures_util::stream::Stream;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};
use uh_events::Event;
use uh_notify::{SubscriberHandle, SubscriberState};

use crate::AppState;

const CONNECTED: &[u8] = b": connected\n\n";
const KEEPALIVE: &[u8] = b": keep-alive\n\n";

/// Limits applied to every SSE connection
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Longest a single connection stays open
    pub max_lifetime: Duration,
    /// Interval between comment lines that keep proxies from closing the connection
    pub keepalive: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_lifetime: Duration::from_secs(1800),
            keepalive: Duration::from_secs(15),
        }
    }
}

/// SSE frame for one event: `event: <routing key>\ndata: <json>\n\n`
pub fn frame(event: &Event) -> serde_json::Result<Bytes> {
    let data = event.to_json_string()?;
    Ok(Bytes::from(format!(
        "event: {}\ndata: {}\n\n",
        event.routing_key(),
        data
    )))
}

/// Event stream bound to one hub subscriber.
///
/// Dropping it (client gone) drops the handle, which unregisters the subscriber.
pub struct NotificationStream {
    handle: SubscriberHandle,
    deadline: Pin<Box<Sleep>>,
    keepalive: Interval,
    started: bool,
    finished: bool,
}

impl NotificationStream {
    pub fn new(handle: SubscriberHandle, settings: &StreamSettings) -> Self {
        let mut keepalive = interval_at(Instant::now() + settings.keepalive, settings.keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            handle,
            deadline: Box::pin(tokio::time::sleep(settings.max_lifetime)),
            keepalive,
            started: false,
            finished: false,
        }
    }

    fn finish(&mut self, cause: SubscriberState) {
        self.finished = true;
        self.handle.close(cause);
    }
}

impl Stream for NotificationStream {
    type Item = Result<Bytes, actix_web::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        if !self.started {
            self.started = true;
            debug!(subscriber_id = %self.handle.id(), "Starting notification stream");
            return Poll::Ready(Some(Ok(Bytes::from_static(CONNECTED))));
        }

        if self.deadline.as_mut().poll(cx).is_ready() {
            info!(subscriber_id = %self.handle.id(), "Notification stream reached its lifetime");
            self.finish(SubscriberState::TimedOut);
            return Poll::Ready(None);
        }

        match self.handle.poll_recv(cx) {
            Poll::Ready(Some(event)) => match frame(&event) {
                Ok(bytes) => return Poll::Ready(Some(Ok(bytes))),
                Err(e) => {
                    warn!(
                        subscriber_id = %self.handle.id(),
                        error = %e,
                        "Failed to encode event, closing stream"
                    );
                    self.finish(SubscriberState::Errored);
                    return Poll::Ready(None);
                }
            },
            Poll::Ready(None) => {
                // The hub removed this subscriber
                debug!(subscriber_id = %self.handle.id(), "Subscriber channel closed");
                self.finished = true;
                return Poll::Ready(None);
            }
            Poll::Pending => {}
        }

        if self.keepalive.poll_tick(cx).is_ready() {
            return Poll::Ready(Some(Ok(Bytes::from_static(KEEPALIVE))));
        }

        Poll::Pending
    }
}

/// Open a live notification stream
#[utoipa::path(
    get,
    path = "/api/sse/notifications",
    tag = "notifications",
    responses(
        (status = 200, description = "Server-sent event stream of user events", content_type = "text/event-stream"),
    )
)]
#[get("/sse/notifications")]
pub async fn notifications(state: web::Data<AppState>) -> HttpResponse {
    let handle = state.hub.register();
    info!(
        subscriber_id = %handle.id(),
        subscribers = state.hub.subscriber_count(),
        "Notification client connected"
    );

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(NotificationStream::new(handle, &state.stream))
}

/// Register the /api routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/api").service(notifications));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_carry_routing_key_and_json() {
        let bytes = frame(&Event::user_created("Al", "al@x.com")).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();

        assert!(text.starts_with("event: user.created\ndata: {"));
        assert!(text.ends_with("}\n\n"));
        assert!(text.contains("\"email\":\"al@x.com\""));
    }
}
