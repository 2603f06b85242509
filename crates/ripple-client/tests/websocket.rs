//! End-to-end over a real WebSocket served by axum on a loopback port.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::routing::get;
use ripple_client::{ClientConfig, ConnectionStatus, RealtimeClient, StaticUser};
use ripple_transport::WebSocketTransport;
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

/// Serve `/ws`: record every text frame, and answer `authenticate` with a
/// comment on post 42.
async fn serve() -> (SocketAddr, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = axum::Router::new().route(
        "/ws",
        get(move |ws: WebSocketUpgrade| {
            let tx = tx.clone();
            async move { ws.on_upgrade(move |socket| session(socket, tx)) }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, rx)
}

async fn session(mut socket: WebSocket, frames: mpsc::UnboundedSender<Value>) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };

        let authenticated = frame["type"] == "authenticate";
        let _ = frames.send(frame);

        if authenticated {
            let comment = json!({
                "type": "new_comment",
                "data": {"post_id": 42, "text": "hi"},
                "timestamp": "2024-01-01T00:00:00.000Z"
            });
            if socket.send(Message::Text(comment.to_string())).await.is_err() {
                break;
            }
        }
    }
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let (addr, mut server_frames) = serve().await;

    let config = ClientConfig {
        endpoint_url: format!("ws://{}/ws", addr),
        ..Default::default()
    };
    let transport = WebSocketTransport::new(config.websocket_config());
    let client = RealtimeClient::new(config, transport, StaticUser::new("u1"));

    let (tx, mut comments) = mpsc::unbounded_channel();
    client
        .subscribe("post_42_comments", move |event| {
            let _ = tx.send(event.data().clone());
        })
        .unwrap();
    let mut status = client.status_events();

    client.connect().await.unwrap();
    assert_eq!(within(status.recv()).await.unwrap(), ConnectionStatus::Connected);

    let auth = within(server_frames.recv()).await.unwrap();
    assert_eq!(auth["type"], "authenticate");
    assert_eq!(auth["data"]["userId"], "u1");

    let comment = within(comments.recv()).await.unwrap();
    assert_eq!(comment["text"], "hi");

    client.send_typing_indicator(42u64, true);
    let typing = within(server_frames.recv()).await.unwrap();
    assert_eq!(typing["type"], "typing_indicator");
    assert_eq!(typing["data"]["post_id"], "42");

    client.disconnect().await;
    assert_eq!(within(status.recv()).await.unwrap(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_unreachable_endpoint_reports_connection_failed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig {
        endpoint_url: format!("ws://{}/ws", addr),
        max_reconnect_attempts: 2,
        base_backoff_ms: 10,
        ..Default::default()
    };
    let transport = WebSocketTransport::new(config.websocket_config());
    let client = RealtimeClient::new(config, transport, StaticUser::new("u1"));
    let mut status = client.status_events();

    client.connect().await.unwrap();
    assert_eq!(
        within(status.recv()).await.unwrap(),
        ConnectionStatus::ConnectionFailed
    );
}
