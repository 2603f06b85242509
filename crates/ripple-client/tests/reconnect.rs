//! Reconnection behavior, driven by the in-memory transport on a paused clock.

use ripple_client::{ClientConfig, ConnectionStatus, RealtimeClient, StaticUser};
use ripple_transport::{ConnectionState, MockTransport};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(600), future)
        .await
        .expect("timed out")
}

async fn next_status(events: &mut broadcast::Receiver<ConnectionStatus>) -> ConnectionStatus {
    within(events.recv()).await.unwrap()
}

fn gaps_ms(times: &[Instant]) -> Vec<u64> {
    times
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
        .collect()
}

fn assert_gaps(times: &[Instant], expected: &[u64]) {
    let gaps = gaps_ms(times);
    assert_eq!(gaps.len(), expected.len(), "gaps: {:?}", gaps);
    for (gap, want) in gaps.iter().zip(expected) {
        assert!(
            *gap >= *want && *gap < *want + 5,
            "gaps {:?}, expected {:?}",
            gaps,
            expected
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts() {
    let transport = MockTransport::new();
    transport.refuse_connections(true);

    let config = ClientConfig {
        max_reconnect_attempts: 3,
        ..Default::default()
    };
    let client = RealtimeClient::new(config, transport.clone(), StaticUser::new("u1"));

    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    client.on_status(move |status| {
        if status == ConnectionStatus::ConnectionFailed {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    let mut events = client.status_events();

    client.connect().await.unwrap();
    assert_eq!(next_status(&mut events).await, ConnectionStatus::ConnectionFailed);

    // The initial attempt plus three reconnection attempts.
    let times = transport.attempt_times();
    assert_eq!(times.len(), 4);
    assert_gaps(&times, &[1000, 2000, 4000]);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(transport.connect_attempts(), 4);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_is_capped() {
    let transport = MockTransport::new();
    transport.refuse_connections(true);

    let config = ClientConfig {
        max_reconnect_attempts: 4,
        max_backoff_ms: 3_000,
        ..Default::default()
    };
    let client = RealtimeClient::new(config, transport.clone(), StaticUser::new("u1"));
    let mut events = client.status_events();

    client.connect().await.unwrap();
    assert_eq!(next_status(&mut events).await, ConnectionStatus::ConnectionFailed);
    assert_gaps(&transport.attempt_times(), &[1000, 2000, 3000, 3000]);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_counter_resets_after_reconnect() {
    let transport = MockTransport::new();
    transport.fail_next(2);

    let client = RealtimeClient::new(
        ClientConfig::default(),
        transport.clone(),
        StaticUser::new("u1"),
    );
    let mut events = client.status_events();
    client.connect().await.unwrap();

    let peer = within(transport.accept()).await.unwrap();
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);

    peer.close();
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Disconnected);

    let _peer = within(transport.accept()).await.unwrap();
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);

    // Two failures (1s, 2s), success, then a drop retried after 1s again.
    let times = transport.attempt_times();
    assert_eq!(times.len(), 4);
    assert_gaps(&times, &[1000, 2000, 1000]);
    assert_eq!(client.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_triggers_reconnect() {
    let transport = MockTransport::new();
    let client = RealtimeClient::new(
        ClientConfig::default(),
        transport.clone(),
        StaticUser::new("u1"),
    );
    let mut events = client.status_events();
    client.connect().await.unwrap();

    let peer = within(transport.accept()).await.unwrap();
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);

    peer.fail("connection reset by peer");
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Disconnected);
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);
    assert_eq!(transport.connect_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_suppresses_reconnect() {
    let transport = MockTransport::new();
    let client = RealtimeClient::new(
        ClientConfig::default(),
        transport.clone(),
        StaticUser::new("u1"),
    );
    let mut events = client.status_events();
    client.connect().await.unwrap();

    let mut peer = within(transport.accept()).await.unwrap();
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);

    client.disconnect().await;
    client.disconnect().await;
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Disconnected);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // The server sees the authenticate frame, then the close.
    assert!(within(peer.recv()).await.is_some());
    assert_eq!(within(peer.recv()).await, None);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_idempotent_and_restartable() {
    let transport = MockTransport::new();
    let client = RealtimeClient::new(
        ClientConfig::default(),
        transport.clone(),
        StaticUser::new("u1"),
    );
    let mut events = client.status_events();

    client.connect().await.unwrap();
    client.connect().await.unwrap();
    let _first = within(transport.accept()).await.unwrap();
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);
    assert_eq!(transport.connect_attempts(), 1);

    client.disconnect().await;
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Disconnected);

    client.connect().await.unwrap();
    let _second = within(transport.accept()).await.unwrap();
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);
    assert_eq!(transport.connect_attempts(), 2);
}
