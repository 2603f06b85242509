//! The envelope exchanged over the transport.
//!
//! Envelopes are immutable once built. Inbound envelopes are produced by the
//! codec and consumed once by the router; outbound envelopes are built with
//! the helpers below and handed to the client's outbound gateway.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::events::PostId;

/// Outbound frame types understood by the server.
pub mod outbound {
    pub const AUTHENTICATE: &str = "authenticate";
    pub const JOIN_THREAD: &str = "join_thread";
    pub const LEAVE_THREAD: &str = "leave_thread";
    pub const TYPING_INDICATOR: &str = "typing_indicator";
    pub const LIVE_INTERACTION: &str = "live_interaction";
}

/// Current wall-clock time in the ISO-8601 form used on the wire.
#[must_use]
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A wire frame: `{ type, data, timestamp }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

impl Envelope {
    /// Create an envelope stamped with the current time.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Some(now_timestamp()),
        }
    }

    /// Create an envelope without a timestamp.
    #[must_use]
    pub fn unstamped(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: None,
        }
    }

    /// The `type` field.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The `data` payload.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// The sender's timestamp, if any.
    #[must_use]
    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    /// Split into `(type, data, timestamp)`.
    #[must_use]
    pub fn into_parts(self) -> (String, Value, Option<String>) {
        (self.kind, self.data, self.timestamp)
    }

    /// Build the handshake frame sent on every successful open.
    #[must_use]
    pub fn authenticate(user_id: &str) -> Self {
        let timestamp = now_timestamp();
        Self {
            kind: outbound::AUTHENTICATE.to_string(),
            data: json!({ "userId": user_id, "timestamp": timestamp }),
            timestamp: Some(timestamp),
        }
    }

    /// Build a `join_thread` frame.
    #[must_use]
    pub fn join_thread(post_id: &PostId, user_id: &str) -> Self {
        Self::thread_frame(outbound::JOIN_THREAD, post_id, user_id)
    }

    /// Build a `leave_thread` frame.
    #[must_use]
    pub fn leave_thread(post_id: &PostId, user_id: &str) -> Self {
        Self::thread_frame(outbound::LEAVE_THREAD, post_id, user_id)
    }

    fn thread_frame(kind: &str, post_id: &PostId, user_id: &str) -> Self {
        let timestamp = now_timestamp();
        Self {
            kind: kind.to_string(),
            data: json!({
                "post_id": post_id,
                "user_id": user_id,
                "timestamp": timestamp,
            }),
            timestamp: Some(timestamp),
        }
    }

    /// Build a `typing_indicator` frame.
    #[must_use]
    pub fn typing_indicator(post_id: &PostId, user_id: &str, is_typing: bool) -> Self {
        let timestamp = now_timestamp();
        Self {
            kind: outbound::TYPING_INDICATOR.to_string(),
            data: json!({
                "post_id": post_id,
                "user_id": user_id,
                "is_typing": is_typing,
                "timestamp": timestamp,
            }),
            timestamp: Some(timestamp),
        }
    }

    /// Build a `live_interaction` frame.
    #[must_use]
    pub fn live_interaction(
        post_id: &PostId,
        user_id: &str,
        interaction_type: &str,
        interaction_data: Value,
    ) -> Self {
        let timestamp = now_timestamp();
        Self {
            kind: outbound::LIVE_INTERACTION.to_string(),
            data: json!({
                "post_id": post_id,
                "user_id": user_id,
                "interaction_type": interaction_type,
                "interaction_data": interaction_data,
                "timestamp": timestamp,
            }),
            timestamp: Some(timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticate_payload() {
        let frame = Envelope::authenticate("user-7");
        assert_eq!(frame.kind(), "authenticate");
        assert_eq!(frame.data()["userId"], "user-7");
        assert_eq!(
            frame.data()["timestamp"].as_str(),
            frame.timestamp(),
            "payload and envelope carry the same timestamp"
        );
    }

    #[test]
    fn test_thread_frames() {
        let post = PostId::from(42u64);
        let join = Envelope::join_thread(&post, "u1");
        let leave = Envelope::leave_thread(&post, "u1");

        assert_eq!(join.kind(), "join_thread");
        assert_eq!(leave.kind(), "leave_thread");
        assert_eq!(join.data()["post_id"], "42");
        assert_eq!(leave.data()["user_id"], "u1");
    }

    #[test]
    fn test_live_interaction_payload() {
        let post = PostId::from("abc");
        let frame = Envelope::live_interaction(&post, "u1", "view", json!({"scroll": 0.5}));

        assert_eq!(frame.data()["interaction_type"], "view");
        assert_eq!(frame.data()["interaction_data"]["scroll"], 0.5);
    }

    #[test]
    fn test_unstamped_has_no_timestamp() {
        let frame = Envelope::unstamped("echo", Value::Null);
        assert!(frame.timestamp().is_none());
        let (kind, data, timestamp) = frame.into_parts();
        assert_eq!(kind, "echo");
        assert!(data.is_null());
        assert!(timestamp.is_none());
    }
}
