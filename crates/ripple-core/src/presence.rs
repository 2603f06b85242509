//! Interaction presence for Ripple.
//!
//! Tracks who is currently interacting with a post ("user X is viewing
//! post Y"). Records are keyed by `(post_id, user_id)`, so a newer
//! interaction from the same user on the same post replaces the older one.
//! Every record expires a fixed TTL after it was written.

use chrono::{DateTime, Utc};
use ripple_protocol::events::user_id_from_payload;
use ripple_protocol::PostId;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Default lifetime of an interaction record.
pub const DEFAULT_INTERACTION_TTL: Duration = Duration::from_secs(30);

/// Composite key of an interaction record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InteractionKey {
    pub post_id: PostId,
    pub user_id: String,
}

impl InteractionKey {
    #[must_use]
    pub fn new(post_id: PostId, user_id: impl Into<String>) -> Self {
        Self {
            post_id,
            user_id: user_id.into(),
        }
    }
}

/// A short-lived fact about a user's activity on a post.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionRecord {
    pub post_id: PostId,
    pub user_id: String,
    /// e.g. `view`, `reaction`, `scroll`.
    pub interaction_type: String,
    pub data: Value,
    /// Wall-clock time of the interaction.
    pub timestamp: DateTime<Utc>,
    /// Monotonic expiry deadline.
    #[serde(skip)]
    pub expires_at: Instant,
}

impl InteractionRecord {
    /// Build a record from an inbound `live_interaction` payload.
    ///
    /// Returns `None` when the payload lacks a post id or a user id.
    #[must_use]
    pub fn from_payload(data: &Value, ttl: Duration) -> Option<Self> {
        let post_id = PostId::from_payload(data)?;
        let user_id = user_id_from_payload(data)?;

        let interaction_type = data
            .get("interaction_type")
            .or_else(|| data.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let timestamp = data
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map_or_else(Utc::now, |ts| ts.with_timezone(&Utc));

        Some(Self {
            post_id,
            user_id,
            interaction_type,
            data: data.get("interaction_data").cloned().unwrap_or(Value::Null),
            timestamp,
            expires_at: Instant::now() + ttl,
        })
    }

    /// The record's key.
    #[must_use]
    pub fn key(&self) -> InteractionKey {
        InteractionKey::new(self.post_id.clone(), self.user_id.clone())
    }

    /// Whether the record is past its deadline at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Store of live interaction records.
///
/// Reads never return an expired record, whether or not it has been
/// evicted yet. [`InteractionStore::prune_expired`] evicts physically and is
/// meant to be driven by a periodic sweep.
///
/// Cloning is cheap and yields a handle to the same store.
#[derive(Debug, Clone)]
pub struct InteractionStore {
    records: Arc<Mutex<HashMap<InteractionKey, InteractionRecord>>>,
    ttl: Duration,
}

impl InteractionStore {
    /// Create a store whose records live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<InteractionKey, InteractionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or overwrite the record for its key.
    ///
    /// Returns `true` if no live record existed for that key.
    pub fn upsert(&self, record: InteractionRecord) -> bool {
        let key = record.key();
        let now = Instant::now();
        let previous = self.lock().insert(key.clone(), record);
        let is_new = previous.map_or(true, |p| p.is_expired_at(now));

        if is_new {
            debug!(post = %key.post_id, user = %key.user_id, "Interaction started");
        } else {
            trace!(post = %key.post_id, user = %key.user_id, "Interaction refreshed");
        }
        is_new
    }

    /// Record an interaction that expires one TTL from now.
    pub fn record(
        &self,
        post_id: PostId,
        user_id: impl Into<String>,
        interaction_type: impl Into<String>,
        data: Value,
    ) -> InteractionRecord {
        let record = InteractionRecord {
            post_id,
            user_id: user_id.into(),
            interaction_type: interaction_type.into(),
            data,
            timestamp: Utc::now(),
            expires_at: Instant::now() + self.ttl,
        };
        self.upsert(record.clone());
        record
    }

    /// Number of users currently interacting with a post.
    #[must_use]
    pub fn count(&self, post_id: &PostId) -> usize {
        let now = Instant::now();
        self.lock()
            .values()
            .filter(|r| &r.post_id == post_id && !r.is_expired_at(now))
            .count()
    }

    /// Live records for a post, oldest first.
    #[must_use]
    pub fn list(&self, post_id: &PostId) -> Vec<InteractionRecord> {
        let now = Instant::now();
        let mut records: Vec<InteractionRecord> = self
            .lock()
            .values()
            .filter(|r| &r.post_id == post_id && !r.is_expired_at(now))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        records
    }

    /// IDs of the users currently interacting with a post.
    #[must_use]
    pub fn users(&self, post_id: &PostId) -> Vec<String> {
        self.list(post_id).into_iter().map(|r| r.user_id).collect()
    }

    /// Get the live record for a key.
    #[must_use]
    pub fn get(&self, post_id: &PostId, user_id: &str) -> Option<InteractionRecord> {
        let key = InteractionKey::new(post_id.clone(), user_id);
        let now = Instant::now();
        self.lock()
            .get(&key)
            .filter(|r| !r.is_expired_at(now))
            .cloned()
    }

    /// Remove the record for a key, returning it if it was still live.
    pub fn remove(&self, post_id: &PostId, user_id: &str) -> Option<InteractionRecord> {
        let key = InteractionKey::new(post_id.clone(), user_id);
        let now = Instant::now();
        self.lock().remove(&key).filter(|r| !r.is_expired_at(now))
    }

    /// Evict every expired record.
    ///
    /// Returns the keys that were evicted.
    pub fn prune_expired(&self) -> Vec<InteractionKey> {
        let now = Instant::now();
        let mut records = self.lock();
        let expired: Vec<InteractionKey> = records
            .iter()
            .filter(|(_, r)| r.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            records.remove(key);
            debug!(post = %key.post_id, user = %key.user_id, "Interaction expired");
        }

        expired
    }

    /// Number of live records across all posts.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|r| !r.is_expired_at(now)).count()
    }

    /// Check if there are no live records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InteractionStore {
    fn default() -> Self {
        Self::new(DEFAULT_INTERACTION_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_record_visible_until_ttl() {
        let store = InteractionStore::default();
        let post = PostId::from(42u64);
        store.record(post.clone(), "u1", "view", Value::Null);

        tokio::time::advance(Duration::from_millis(29_999)).await;
        assert_eq!(store.count(&post), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(store.count(&post), 0);
        assert!(store.list(&post).is_empty());
        assert!(store.get(&post, "u1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_overwrites_same_key() {
        let store = InteractionStore::default();
        let post = PostId::from(7u64);

        store.record(post.clone(), "u1", "view", Value::Null);
        tokio::time::advance(Duration::from_secs(20)).await;
        store.record(post.clone(), "u1", "reaction", json!({"emoji": "+1"}));

        assert_eq!(store.count(&post), 1);
        assert_eq!(store.get(&post, "u1").unwrap().interaction_type, "reaction");

        // The refresh pushed the deadline out.
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(store.count(&post), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_filters_by_post() {
        let store = InteractionStore::default();
        let a = PostId::from("a");
        let b = PostId::from("b");

        store.record(a.clone(), "u1", "view", Value::Null);
        store.record(a.clone(), "u2", "view", Value::Null);
        store.record(b.clone(), "u1", "view", Value::Null);

        assert_eq!(store.count(&a), 2);
        assert_eq!(store.count(&b), 1);
        assert_eq!(store.len(), 3);

        let mut users = store.users(&a);
        users.sort();
        assert_eq!(users, vec!["u1", "u2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_expired() {
        let store = InteractionStore::new(Duration::from_secs(5));
        let post = PostId::from("p");

        store.record(post.clone(), "old", "view", Value::Null);
        tokio::time::advance(Duration::from_secs(3)).await;
        store.record(post.clone(), "new", "view", Value::Null);
        tokio::time::advance(Duration::from_secs(3)).await;

        let pruned = store.prune_expired();
        assert_eq!(pruned, vec![InteractionKey::new(post.clone(), "old")]);
        assert_eq!(store.users(&post), vec!["new"]);
        assert!(store.prune_expired().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_from_payload() {
        let payload = json!({
            "post_id": 42,
            "user_id": "u9",
            "interaction_type": "view",
            "interaction_data": {"section": "comments"},
            "timestamp": "2024-05-01T12:00:00.000Z"
        });

        let record = InteractionRecord::from_payload(&payload, DEFAULT_INTERACTION_TTL).unwrap();
        assert_eq!(record.post_id, PostId::from(42u64));
        assert_eq!(record.user_id, "u9");
        assert_eq!(record.interaction_type, "view");
        assert_eq!(record.data["section"], "comments");
        assert_eq!(record.timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");

        assert!(InteractionRecord::from_payload(&json!({"post_id": 1}), DEFAULT_INTERACTION_TTL).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_returns_live_record() {
        let store = InteractionStore::default();
        let post = PostId::from("p");
        store.record(post.clone(), "u1", "view", Value::Null);

        assert!(store.remove(&post, "u1").is_some());
        assert!(store.remove(&post, "u1").is_none());
        assert!(store.is_empty());
    }
}
