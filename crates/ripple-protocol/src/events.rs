//! Inbound event vocabulary and topic derivation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier of a post (the context most topics are derived from).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    /// Create a post ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read a post ID out of an event payload.
    ///
    /// Looks at `post_id`, then `postId`. Numbers are rendered in decimal.
    #[must_use]
    pub fn from_payload(data: &Value) -> Option<Self> {
        id_field(data, &["post_id", "postId"]).map(Self)
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PostId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PostId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for PostId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<i64> for PostId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

/// Read a user ID out of an event payload (`user_id`, then `userId`).
#[must_use]
pub fn user_id_from_payload(data: &Value) -> Option<String> {
    id_field(data, &["user_id", "userId"])
}

fn id_field(data: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match data.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Inbound event types that get type-specific pre-processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewComment,
    NewPost,
    /// `user_typing`, or `typing_indicator` relayed by the server.
    UserTyping,
    LiveInteraction,
    AiPostGenerated,
}

impl EventKind {
    /// Every known kind.
    pub const ALL: [EventKind; 5] = [
        EventKind::NewComment,
        EventKind::NewPost,
        EventKind::UserTyping,
        EventKind::LiveInteraction,
        EventKind::AiPostGenerated,
    ];

    /// Classify a frame `type`. Returns `None` for unknown types.
    #[must_use]
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "new_comment" => Some(EventKind::NewComment),
            "new_post" => Some(EventKind::NewPost),
            "user_typing" | "typing_indicator" => Some(EventKind::UserTyping),
            "live_interaction" => Some(EventKind::LiveInteraction),
            "ai_post_generated" => Some(EventKind::AiPostGenerated),
            _ => None,
        }
    }

    /// Canonical wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewComment => "new_comment",
            EventKind::NewPost => "new_post",
            EventKind::UserTyping => "user_typing",
            EventKind::LiveInteraction => "live_interaction",
            EventKind::AiPostGenerated => "ai_post_generated",
        }
    }

    /// The per-thread topic this event also fans out to, if its payload
    /// carries a post id.
    #[must_use]
    pub fn context_topic(&self, data: &Value) -> Option<String> {
        let post = PostId::from_payload(data)?;
        match self {
            EventKind::NewComment => Some(topics::post_comments(&post)),
            EventKind::UserTyping => Some(topics::post_typing(&post)),
            EventKind::LiveInteraction => Some(topics::post_interactions(&post)),
            EventKind::NewPost | EventKind::AiPostGenerated => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic names derived deterministically from context ids.
pub mod topics {
    use super::PostId;
    use serde_json::Value;

    /// Extra topic for posts flagged as AI-originated.
    pub const AI_POST: &str = "ai_post";

    #[must_use]
    pub fn post_comments(post: &PostId) -> String {
        format!("post_{post}_comments")
    }

    #[must_use]
    pub fn post_typing(post: &PostId) -> String {
        format!("post_{post}_typing")
    }

    #[must_use]
    pub fn post_interactions(post: &PostId) -> String {
        format!("post_{post}_interactions")
    }

    /// Whether an `ai_post_generated` payload is flagged as AI-originated.
    #[must_use]
    pub fn is_ai_generated(data: &Value) -> bool {
        ["is_ai_generated", "ai_generated", "isAiGenerated"]
            .iter()
            .any(|flag| data.get(flag).and_then(Value::as_bool).unwrap_or(false))
    }
}
