//! Live thread membership.
//!
//! Joining a thread registers three subscriptions (comments, typing,
//! interactions) for one post as a unit; leaving cancels all three at once.

use crate::event::Event;
use crate::registry::{
    Handler, RegistryError, SubscriptionHandle, SubscriptionId, SubscriptionOptions,
    SubscriptionRegistry,
};
use chrono::{DateTime, Utc};
use ripple_protocol::{topics, PostId};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Callbacks for a joined thread. Unset callbacks are no-ops.
#[derive(Clone)]
pub struct ThreadHandlers {
    on_comment: Handler,
    on_typing: Handler,
    on_interaction: Handler,
}

impl ThreadHandlers {
    #[must_use]
    pub fn new() -> Self {
        let noop: Handler = Arc::new(|_: &Event| {});
        Self {
            on_comment: Arc::clone(&noop),
            on_typing: Arc::clone(&noop),
            on_interaction: noop,
        }
    }

    /// Called for every `new_comment` on the thread.
    #[must_use]
    pub fn on_comment<F>(mut self, f: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.on_comment = Arc::new(f);
        self
    }

    /// Called for every typing event on the thread.
    #[must_use]
    pub fn on_typing<F>(mut self, f: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.on_typing = Arc::new(f);
        self
    }

    /// Called for every `live_interaction` on the thread.
    #[must_use]
    pub fn on_interaction<F>(mut self, f: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.on_interaction = Arc::new(f);
        self
    }
}

impl Default for ThreadHandlers {
    fn default() -> Self {
        Self::new()
    }
}

/// The composite subscription behind a joined thread.
pub struct ThreadMembership {
    id: Uuid,
    post_id: PostId,
    joined_at: DateTime<Utc>,
    subscriptions: Vec<SubscriptionHandle>,
    registry: SubscriptionRegistry,
    left: AtomicBool,
}

impl ThreadMembership {
    /// Register the three thread subscriptions for `post_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry rejects the batch; in that case no
    /// subscription was made.
    pub fn join(
        registry: &SubscriptionRegistry,
        post_id: PostId,
        handlers: ThreadHandlers,
    ) -> Result<Self, RegistryError> {
        let id = Uuid::new_v4();
        let mut options = SubscriptionOptions::new();
        options.insert("thread".to_string(), json!(id));
        options.insert("post_id".to_string(), json!(post_id));

        let subscriptions = registry.subscribe_batch(vec![
            (topics::post_comments(&post_id), options.clone(), handlers.on_comment),
            (topics::post_typing(&post_id), options.clone(), handlers.on_typing),
            (topics::post_interactions(&post_id), options, handlers.on_interaction),
        ])?;

        debug!(thread = %id, post = %post_id, "Joined thread");

        Ok(Self {
            id,
            post_id,
            joined_at: Utc::now(),
            subscriptions,
            registry: registry.clone(),
            left: AtomicBool::new(false),
        })
    }

    /// Membership identity.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn post_id(&self) -> &PostId {
        &self.post_id
    }

    #[must_use]
    pub fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    /// IDs of the three owned subscriptions.
    #[must_use]
    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.iter().map(SubscriptionHandle::id).collect()
    }

    /// Whether [`leave`](Self::leave) has been called.
    #[must_use]
    pub fn has_left(&self) -> bool {
        self.left.load(Ordering::Acquire)
    }

    /// Cancel all three subscriptions under one registry lock. Idempotent.
    ///
    /// Returns `true` on the first call.
    pub fn leave(&self) -> bool {
        if self.left.swap(true, Ordering::AcqRel) {
            return false;
        }
        let removed = self.registry.unsubscribe_many(&self.subscription_ids());
        debug!(thread = %self.id, post = %self.post_id, removed, "Left thread");
        true
    }
}

impl std::fmt::Debug for ThreadMembership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadMembership")
            .field("id", &self.id)
            .field("post_id", &self.post_id)
            .field("joined_at", &self.joined_at)
            .field("left", &self.has_left())
            .finish()
    }
}
