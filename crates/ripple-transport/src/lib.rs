//! # ripple-transport
//!
//! Client transport abstraction for the Ripple realtime client.
//!
//! - **WebSocket** - the production transport (`tokio-tungstenite`)
//! - **Mock** - an in-memory transport with a scriptable server side, for
//!   deterministic tests without a network
//!
//! ## Transport Abstraction
//!
//! A [`Transport`] opens [`Connection`]s. A connection surfaces the three
//! lifecycle signals of the underlying link through [`Connection::recv`]:
//! a frame (`Ok(Some(_))`), a clean close (`Ok(None)`), or an error (`Err`).
//!
//! ```rust,ignore
//! use ripple_transport::{Connection, Transport};
//!
//! async fn pump(transport: &dyn Transport) {
//!     let mut conn = transport.connect("ws://127.0.0.1:8080/ws").await?;
//!     while let Ok(Some(frame)) = conn.recv().await {
//!         // Route frame
//!     }
//! }
//! ```

pub mod mock;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use mock::{MockPeer, MockTransport};
pub use traits::{Connection, ConnectionId, ConnectionState, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
