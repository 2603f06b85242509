//! In-memory transport for tests.
//!
//! Every successful [`MockTransport::connect`] produces a [`MockPeer`], the
//! server side of the link. Tests pull peers with [`MockTransport::accept`],
//! push frames to the client, read what the client sent, and drop the link
//! either cleanly or with an error.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::traits::{Connection, ConnectionId, Transport, TransportError};

enum PeerSignal {
    Frame(String),
    Malformed(String),
    Error(String),
    Close,
}

struct MockState {
    refuse: bool,
    fail_next: usize,
    send_budget: Option<usize>,
    attempts: Vec<(Instant, String)>,
    accepted: mpsc::UnboundedSender<MockPeer>,
}

/// Scriptable in-memory transport. Clones share state.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    peers: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MockPeer>>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(MockState {
                refuse: false,
                fail_next: 0,
                send_budget: None,
                attempts: Vec::new(),
                accepted: tx,
            })),
            peers: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Refuse every connect attempt until called again with `false`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse = refuse;
    }

    /// Refuse the next `count` connect attempts.
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    /// Let the next opened connection send `count` frames, then fail every
    /// further send as if the link broke.
    pub fn fail_sends_after(&self, count: usize) {
        self.lock().send_budget = Some(count);
    }

    /// Number of connect attempts seen so far, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.lock().attempts.len()
    }

    /// When each connect attempt happened.
    #[must_use]
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.lock().attempts.iter().map(|(at, _)| *at).collect()
    }

    /// Endpoints passed to each connect attempt.
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        self.lock()
            .attempts
            .iter()
            .map(|(_, endpoint)| endpoint.clone())
            .collect()
    }

    /// Wait for the next successful connection and return its server side.
    pub async fn accept(&self) -> Option<MockPeer> {
        self.peers.lock().await.recv().await
    }

    /// Return the server side of a pending connection, if any.
    pub fn try_accept(&self) -> Option<MockPeer> {
        self.peers.try_lock().ok()?.try_recv().ok()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError> {
        let mut state = self.lock();
        state.attempts.push((Instant::now(), endpoint.to_string()));

        if state.refuse {
            return Err(TransportError::ConnectFailed("connection refused".into()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(TransportError::ConnectFailed("connection refused".into()));
        }

        let send_budget = state.send_budget.take();
        let id = ConnectionId::generate();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let peer = MockPeer {
            id: id.clone(),
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        // The receiver lives as long as any clone of the transport.
        let _ = state.accepted.send(peer);

        debug!(connection = %id, endpoint = %endpoint, "Mock connection opened");

        Ok(Box::new(MockConnection {
            id,
            inbound: inbound_rx,
            outbound: Some(outbound_tx),
            open: true,
            send_budget,
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Server side of a mock connection.
pub struct MockPeer {
    id: ConnectionId,
    inbound: mpsc::UnboundedSender<PeerSignal>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl MockPeer {
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Deliver a frame to the client. Returns `false` if the client is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.inbound.send(PeerSignal::Frame(frame.into())).is_ok()
    }

    /// Deliver a frame that cannot be read as text.
    pub fn send_malformed(&self, reason: impl Into<String>) {
        let _ = self.inbound.send(PeerSignal::Malformed(reason.into()));
    }

    /// Fail the link with a transport error.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.inbound.send(PeerSignal::Error(reason.into()));
    }

    /// Close the link cleanly.
    pub fn close(&self) {
        let _ = self.inbound.send(PeerSignal::Close);
    }

    /// Next frame the client sent, or `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// A frame the client already sent, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }
}

struct MockConnection {
    id: ConnectionId,
    inbound: mpsc::UnboundedReceiver<PeerSignal>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    open: bool,
    send_budget: Option<usize>,
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        match self.inbound.recv().await {
            Some(PeerSignal::Frame(frame)) => Ok(Some(frame)),
            Some(PeerSignal::Malformed(reason)) => Err(TransportError::Malformed(reason)),
            Some(PeerSignal::Error(reason)) => {
                self.open = false;
                Err(TransportError::ReceiveFailed(reason))
            }
            Some(PeerSignal::Close) | None => {
                self.open = false;
                Ok(None)
            }
        }
    }

    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }
        if let Some(budget) = self.send_budget.as_mut() {
            if *budget == 0 {
                self.open = false;
                return Err(TransportError::SendFailed("link broken".into()));
            }
            *budget -= 1;
        }
        match &self.outbound {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| TransportError::SendFailed("peer dropped".into())),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        self.outbound = None;
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("mock".to_string())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let transport = MockTransport::new();
        let mut conn = transport.connect("mock://a").await.unwrap();
        let mut peer = transport.accept().await.unwrap();

        assert!(peer.send("hello"));
        assert_eq!(conn.recv().await.unwrap().as_deref(), Some("hello"));

        conn.send("world".to_string()).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("world"));
    }

    #[tokio::test]
    async fn test_close_and_fail_signals() {
        let transport = MockTransport::new();
        let mut conn = transport.connect("mock://a").await.unwrap();
        let peer = transport.accept().await.unwrap();
        peer.close();
        assert_eq!(conn.recv().await.unwrap(), None);
        assert!(!conn.is_open());

        let mut conn = transport.connect("mock://a").await.unwrap();
        let peer = transport.accept().await.unwrap();
        peer.fail("boom");
        assert!(matches!(
            conn.recv().await,
            Err(TransportError::ReceiveFailed(reason)) if reason == "boom"
        ));
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_link_open() {
        let transport = MockTransport::new();
        let mut conn = transport.connect("mock://a").await.unwrap();
        let peer = transport.accept().await.unwrap();

        peer.send_malformed("not text");
        peer.send("after");
        assert!(matches!(conn.recv().await, Err(TransportError::Malformed(_))));
        assert!(conn.is_open());
        assert_eq!(conn.recv().await.unwrap().as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn test_sends_fail_once_budget_is_spent() {
        let transport = MockTransport::new();
        transport.fail_sends_after(1);
        let mut conn = transport.connect("mock://a").await.unwrap();
        let mut peer = transport.accept().await.unwrap();

        conn.send("one".to_string()).await.unwrap();
        assert!(matches!(
            conn.send("two".to_string()).await,
            Err(TransportError::SendFailed(_))
        ));
        assert!(!conn.is_open());
        assert_eq!(peer.recv().await.as_deref(), Some("one"));

        // Only the next connection is affected.
        let mut conn = transport.connect("mock://a").await.unwrap();
        conn.send("three".to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn test_client_close_ends_peer_stream() {
        let transport = MockTransport::new();
        let mut conn = transport.connect("mock://a").await.unwrap();
        let mut peer = transport.accept().await.unwrap();

        conn.close().await.unwrap();
        assert!(conn.send("late".to_string()).await.is_err());
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn test_refused_connects_are_counted() {
        let transport = MockTransport::new();
        transport.fail_next(2);

        assert!(transport.connect("mock://a").await.is_err());
        assert!(transport.connect("mock://a").await.is_err());
        assert!(transport.connect("mock://a").await.is_ok());
        assert_eq!(transport.connect_attempts(), 3);
        assert!(transport.try_accept().is_some());
        assert!(transport.try_accept().is_none());

        transport.refuse_connections(true);
        assert!(transport.connect("mock://a").await.is_err());
        assert_eq!(transport.endpoints().len(), 4);
    }
}
