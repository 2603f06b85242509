//! # ripple-protocol
//!
//! Wire protocol definitions for the Ripple realtime client.
//!
//! Every frame exchanged with the server is a JSON [`Envelope`]:
//!
//! ```text
//! { "type": "new_comment", "data": { "post_id": 42, ... }, "timestamp": "..." }
//! ```
//!
//! ## Vocabulary
//!
//! - [`EventKind`] - inbound event types the router pre-processes
//! - [`topics`] - deterministic topic names derived from context ids
//! - [`Envelope`] builders for the outbound types (`authenticate`,
//!   `join_thread`, `leave_thread`, `typing_indicator`, `live_interaction`)
//!
//! ## Example
//!
//! ```rust
//! use ripple_protocol::{codec, Envelope, PostId};
//!
//! let frame = Envelope::typing_indicator(&PostId::from(42u64), "user-1", true);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.kind(), "typing_indicator");
//! ```

pub mod codec;
pub mod envelope;
pub mod events;

pub use codec::{decode, decode_bytes, encode, ProtocolError};
pub use envelope::{outbound, Envelope};
pub use events::{topics, EventKind, PostId};
