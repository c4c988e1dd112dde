//! ABOUTME: Tests for the server-sent events notification stream
//! ABOUTME: Drives the streaming response body directly to observe frames and disconnects

use actix_web::body::MessageBody;
use actix_web::test;
use bytes::Bytes;
use futures_util::future::poll_fn;
use std::sync::Arc;
use std::time::Duration;
use test_support::{temp_db_path, wait_until};
use uh_core::PipelineMetrics;
use uh_db::{Cache, Db};
use uh_events::{BrokerPublisher, Event, InMemoryBroker, Topology};
use uh_notify::{FanoutHub, HubSettings};
use uh_web::{create_app, AppState, StreamSettings};

async fn test_state(stream: StreamSettings) -> (tempfile::TempDir, AppState) {
    let (dir, path) = temp_db_path();
    let db = Db::new(&path, 2).await.unwrap();

    let broker = Arc::new(InMemoryBroker::new());
    Topology::new("user.exchange")
        .bind("user.created.queue", "user.created")
        .declare(broker.as_ref())
        .await
        .unwrap();

    let metrics = PipelineMetrics::new();
    let publisher = Arc::new(BrokerPublisher::new(broker, "user.exchange", metrics.clone()));
    let cache = Arc::new(Cache::new("users_by_email", 16, Duration::from_secs(60)));
    let hub = FanoutHub::new(HubSettings::default(), metrics);

    (dir, AppState::new(db, cache, publisher, hub, stream))
}

async fn next_chunk<B>(body: std::pin::Pin<&mut B>) -> Option<Bytes>
where
    B: MessageBody,
{
    let mut body = body;
    let chunk = tokio::time::timeout(
        Duration::from_secs(2),
        poll_fn(|cx| body.as_mut().poll_next(cx)),
    )
    .await
    .expect("chunk within timeout");

    match chunk {
        Some(Ok(bytes)) => Some(bytes),
        Some(Err(_)) => panic!("body error"),
        None => None,
    }
}

#[actix_web::test]
async fn test_stream_delivers_event_frames() {
    let (_dir, state) = test_state(StreamSettings::default()).await;
    let hub = state.hub.clone();
    let app = test::init_service(create_app(state)).await;

    let req = test::TestRequest::get()
        .uri("/api/sse/notifications")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(hub.subscriber_count(), 1);

    let body = resp.into_body();
    let mut body = std::pin::pin!(body);

    let first = next_chunk(body.as_mut()).await.unwrap();
    assert_eq!(&first[..], b": connected\n\n");

    let report = hub.broadcast(Event::user_created("Al", "al@x.com")).await;
    assert_eq!(report.delivered, 1);

    let frame = next_chunk(body.as_mut()).await.unwrap();
    let text = std::str::from_utf8(&frame).unwrap();
    assert!(text.starts_with("event: user.created\n"));
    assert!(text.contains("\"type\":\"user_created\""));
    assert!(text.contains("\"email\":\"al@x.com\""));
}

#[actix_web::test]
async fn test_dropping_stream_unregisters_subscriber() {
    let (_dir, state) = test_state(StreamSettings::default()).await;
    let hub = state.hub.clone();
    let app = test::init_service(create_app(state)).await;

    let req = test::TestRequest::get()
        .uri("/api/sse/notifications")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(hub.subscriber_count(), 1);

    drop(resp);
    assert_eq!(hub.subscriber_count(), 0);

    let report = hub.broadcast(Event::user_created("Al", "al@x.com")).await;
    assert_eq!(report.attempted, 0);
}

#[actix_web::test]
async fn test_stream_ends_at_max_lifetime() {
    let settings = StreamSettings {
        max_lifetime: Duration::from_millis(50),
        keepalive: Duration::from_secs(60),
    };
    let (_dir, state) = test_state(settings).await;
    let hub = state.hub.clone();
    let app = test::init_service(create_app(state)).await;

    let req = test::TestRequest::get()
        .uri("/api/sse/notifications")
        .to_request();
    let resp = test::call_service(&app, req).await;

    let body = resp.into_body();
    let mut body = std::pin::pin!(body);

    assert!(next_chunk(body.as_mut()).await.is_some());
    assert!(next_chunk(body.as_mut()).await.is_none());

    let hub_check = hub.clone();
    assert!(
        wait_until(Duration::from_secs(1), move || {
            let hub = hub_check.clone();
            async move { hub.subscriber_count() == 0 }
        })
        .await
    );
}

#[actix_web::test]
async fn test_stream_sends_keepalive_comments() {
    let settings = StreamSettings {
        max_lifetime: Duration::from_secs(60),
        keepalive: Duration::from_millis(20),
    };
    let (_dir, state) = test_state(settings).await;
    let app = test::init_service(create_app(state)).await;

    let req = test::TestRequest::get()
        .uri("/api/sse/notifications")
        .to_request();
    let resp = test::call_service(&app, req).await;

    let body = resp.into_body();
    let mut body = std::pin::pin!(body);

    next_chunk(body.as_mut()).await.unwrap();
    let keepalive = next_chunk(body.as_mut()).await.unwrap();
    assert_eq!(&keepalive[..], b": keep-alive\n\n");
}
