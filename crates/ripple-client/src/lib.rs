//! # ripple-client
//!
//! Realtime event client for Ripple.
//!
//! A [`RealtimeClient`] keeps one connection to the server open, multiplexes
//! topic subscriptions over it, records live interactions, and reconnects
//! with exponential backoff when the link drops.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ripple_client::{ClientConfig, RealtimeClient, StaticUser};
//! use ripple_core::ThreadHandlers;
//! use ripple_transport::WebSocketTransport;
//!
//! let config = ClientConfig::load()?;
//! let transport = WebSocketTransport::new(config.websocket_config());
//! let client = RealtimeClient::new(config, transport, StaticUser::new("user-1"));
//!
//! client.on_status(|status| println!("status: {status}"));
//! let thread = client.join_live_thread(42u64, ThreadHandlers::new()
//!     .on_comment(|event| println!("comment: {}", event.data())))?;
//!
//! client.connect().await?;
//! client.send_typing_indicator(42u64, true);
//! // ...
//! thread.leave();
//! client.disconnect().await;
//! ```

pub mod client;
pub mod config;
mod connection;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod status;
pub mod user;

pub use client::{LiveThread, RealtimeClient};
pub use config::{ClientConfig, MetricsConfig, OutboundPolicy};
pub use error::ClientError;
pub use status::{ConnectionStatus, StatusObserverId, StatusObservers};
pub use user::{StaticUser, UserIdProvider};
