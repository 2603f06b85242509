//! Transport abstraction traits for Ripple.
//!
//! These traits define the interface every client transport provides, so the
//! connection actor is independent of the wire technology.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::new_v4().simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of the client's logical connection.
///
/// ```text
/// Disconnected ──▶ Connecting ──▶ Open ──▶ Closing ──▶ Disconnected
///      ▲                 │          │
///      └──── error ──────┴──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        }
    }

    /// Whether frames can be sent right now.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to open a connection.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// An inbound frame could not be read as text. The link stays usable.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Inbound frame exceeds the configured limit.
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Something that can open connections to an endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `endpoint`.
    ///
    /// Resolves once the link is usable (the "opened" signal) or fails.
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket", "mock").
    fn name(&self) -> &'static str;
}

/// An open link to the server carrying text frames.
#[async_trait]
pub trait Connection: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` when the link closed cleanly and `Err` when it
    /// failed. [`TransportError::Malformed`] rejects a single frame and
    /// leaves the link open. Must be cancel safe: dropping the future before it resolves
    /// loses no frame.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Send a text frame.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the connection gracefully. Idempotent.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
    }

    #[test]
    fn test_connection_state() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Closing.is_open());
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
