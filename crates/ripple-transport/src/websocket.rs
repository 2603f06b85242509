//! WebSocket transport implementation.
//!
//! This module provides a WebSocket client transport using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, warn};

use crate::traits::{Connection, ConnectionId, Transport, TransportError};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// How long the TCP + WebSocket handshake may take.
    pub connect_timeout: Duration,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_message_size: 1024 * 1024, // 1 MiB
        }
    }
}

/// WebSocket client transport.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Get the transport configuration.
    #[must_use]
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, TransportError> {
        debug!(endpoint = %endpoint, "Opening WebSocket");

        let (stream, response) =
            tokio::time::timeout(self.config.connect_timeout, connect_async(endpoint))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| {
                    error!(endpoint = %endpoint, error = %e, "WebSocket handshake failed");
                    TransportError::ConnectFailed(e.to_string())
                })?;

        debug!(
            endpoint = %endpoint,
            status = %response.status(),
            "WebSocket handshake completed"
        );

        Ok(Box::new(WebSocketConnection::new(
            stream,
            endpoint,
            self.config.max_message_size,
        )))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// A client WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    endpoint: String,
    is_open: bool,
    max_message_size: usize,
}

impl WebSocketConnection {
    fn new(
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        endpoint: &str,
        max_message_size: usize,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            stream,
            endpoint: endpoint.to_string(),
            is_open: true,
            max_message_size,
        }
    }

    fn check_size(&mut self, len: usize) -> Result<(), TransportError> {
        if len > self.max_message_size {
            warn!(
                connection = %self.id,
                "Message too large: {} bytes (max: {})",
                len,
                self.max_message_size
            );
            self.is_open = false;
            return Err(TransportError::FrameTooLarge(len));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.check_size(text.len())?;
                    return Ok(Some(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    self.check_size(data.len())?;
                    return String::from_utf8(data).map(Some).map_err(|e| {
                        warn!(connection = %self.id, error = %e, "Binary frame is not UTF-8");
                        TransportError::Malformed(e.to_string())
                    });
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // Pongs are queued by tungstenite itself.
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(connection = %self.id, ?frame, "Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    debug!(connection = %self.id, "Connection closed");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!(connection = %self.id, error = %e, "WebSocket error");
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        self.stream
            .send(Message::Text(frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(()); // Already closed
        }
        self.is_open = false;

        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(format!("Failed to close: {}", e))),
        }
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.endpoint.clone())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
