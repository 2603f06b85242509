//! The value handed to subscriber callbacks.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// A routed event, as seen by one topic's subscribers.
///
/// When a frame fans out to several topics, every copy shares the same
/// `seq` and payload and differs only in `topic`.
#[derive(Debug, Clone)]
pub struct Event {
    /// Router-assigned sequence number, increasing in wire order.
    pub seq: u64,
    /// Topic this copy was delivered under.
    pub topic: String,
    /// The frame's `type`.
    pub kind: String,
    /// The frame's `data` (shared across topics).
    pub data: Arc<Value>,
    /// The sender's timestamp, if present.
    pub timestamp: Option<String>,
    /// When the router received the frame.
    pub received_at: DateTime<Utc>,
}

impl Event {
    /// Create an event for a topic.
    #[must_use]
    pub fn new(topic: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        Self {
            seq: 0,
            topic: topic.into(),
            kind: kind.into(),
            data: Arc::new(data),
            timestamp: None,
            received_at: Utc::now(),
        }
    }

    /// Copy this event under another topic.
    #[must_use]
    pub fn retopic(&self, topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..self.clone()
        }
    }

    /// Get the payload.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }
}
