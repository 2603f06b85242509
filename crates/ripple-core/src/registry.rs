//! Subscription registry.
//!
//! Maps topics to ordered lists of subscriber callbacks. All state sits
//! behind one coarse lock; callbacks always run with the lock released, so a
//! callback may itself subscribe or unsubscribe.

use crate::event::Event;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::ops::AddAssign;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Maximum topic name length.
pub const MAX_TOPIC_LENGTH: usize = 256;

/// Identity of a single registration.
pub type SubscriptionId = Uuid;

/// A subscriber callback.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Free-form options attached to a subscription.
pub type SubscriptionOptions = serde_json::Map<String, Value>;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Invalid topic name.
    #[error("Invalid topic: {0}")]
    InvalidTopic(&'static str),

    /// Maximum subscriptions reached.
    #[error("Maximum subscriptions reached ({0})")]
    MaxSubscriptionsReached(usize),
}

/// Validate a topic name.
///
/// # Errors
///
/// Returns an error message if the topic name is invalid.
pub fn validate_topic(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Topic cannot be empty");
    }
    if name.len() > MAX_TOPIC_LENGTH {
        return Err("Topic too long");
    }
    if name.starts_with('$') {
        return Err("Topics starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Topic contains invalid characters");
    }
    Ok(())
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of live subscriptions across all topics.
    pub max_subscriptions: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_subscriptions: 10_000,
        }
    }
}

/// Result of fanning one event out to one or more topics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Callbacks that returned normally.
    pub delivered: usize,
    /// Callbacks that panicked.
    pub failed: usize,
}

impl AddAssign for Delivery {
    fn add_assign(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.failed += other.failed;
    }
}

/// Public view of a registration.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub topic: String,
    pub options: SubscriptionOptions,
    pub created_at: DateTime<Utc>,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Topics with at least one subscriber.
    pub topic_count: usize,
    /// Live subscriptions.
    pub subscription_count: usize,
}

struct Subscription {
    id: SubscriptionId,
    handler: Handler,
    options: SubscriptionOptions,
    created_at: DateTime<Utc>,
    /// Cleared under the lock on unsubscribe; checked before every call.
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct Topics {
    by_topic: HashMap<String, Vec<Subscription>>,
    index: HashMap<SubscriptionId, String>,
}

impl Topics {
    fn insert(&mut self, topic: String, handler: Handler, options: SubscriptionOptions) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.index.insert(id, topic.clone());
        self.by_topic.entry(topic).or_default().push(Subscription {
            id,
            handler,
            options,
            created_at: Utc::now(),
            active: Arc::new(AtomicBool::new(true)),
        });
        id
    }

    fn remove(&mut self, id: &SubscriptionId) -> bool {
        let Some(topic) = self.index.remove(id) else {
            return false;
        };

        if let Some(subs) = self.by_topic.get_mut(&topic) {
            if let Some(pos) = subs.iter().position(|s| s.id == *id) {
                let sub = subs.remove(pos);
                sub.active.store(false, Ordering::Release);
            }
            if subs.is_empty() {
                self.by_topic.remove(&topic);
                trace!(topic = %topic, "Removed empty topic");
            }
        }

        debug!(topic = %topic, subscription = %id, "Unsubscribed");
        true
    }
}

/// The shared topic registry.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    topics: Arc<Mutex<Topics>>,
    config: RegistryConfig,
}

impl SubscriptionRegistry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            topics: Arc::new(Mutex::new(Topics::default())),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Topics> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback under a topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic name is invalid or the limit is reached.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Result<SubscriptionHandle, RegistryError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_with_options(topic, SubscriptionOptions::new(), handler)
    }

    /// Register a callback under a topic with options attached.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic name is invalid or the limit is reached.
    pub fn subscribe_with_options<F>(
        &self,
        topic: &str,
        options: SubscriptionOptions,
        handler: F,
    ) -> Result<SubscriptionHandle, RegistryError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let mut handles = self.subscribe_batch(vec![(topic.to_string(), options, handler)])?;
        Ok(handles.remove(0))
    }

    /// Register several callbacks at once.
    ///
    /// Either every registration is made or none is.
    ///
    /// # Errors
    ///
    /// Returns an error if any topic name is invalid or the batch would
    /// exceed the subscription limit.
    pub fn subscribe_batch(
        &self,
        batch: Vec<(String, SubscriptionOptions, Handler)>,
    ) -> Result<Vec<SubscriptionHandle>, RegistryError> {
        for (topic, _, _) in &batch {
            validate_topic(topic).map_err(RegistryError::InvalidTopic)?;
        }

        let mut topics = self.lock();
        if topics.index.len() + batch.len() > self.config.max_subscriptions {
            return Err(RegistryError::MaxSubscriptionsReached(
                self.config.max_subscriptions,
            ));
        }

        let handles = batch
            .into_iter()
            .map(|(topic, options, handler)| {
                let id = topics.insert(topic.clone(), handler, options);
                debug!(
                    topic = %topic,
                    subscription = %id,
                    subscribers = topics.by_topic.get(&topic).map_or(0, Vec::len),
                    "Subscribed"
                );
                SubscriptionHandle {
                    id,
                    topic,
                    topics: Arc::clone(&self.topics),
                }
            })
            .collect();

        Ok(handles)
    }

    /// Remove one registration.
    ///
    /// Returns `true` if the registration was live.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        self.lock().remove(id)
    }

    /// Remove several registrations under a single lock.
    ///
    /// Returns the number that were live.
    pub fn unsubscribe_many(&self, ids: &[SubscriptionId]) -> usize {
        let mut topics = self.lock();
        ids.iter().filter(|id| topics.remove(id)).count()
    }

    /// Remove every registration on every topic.
    pub fn unsubscribe_all(&self) {
        let mut topics = self.lock();
        for sub in topics.by_topic.values().flatten() {
            sub.active.store(false, Ordering::Release);
        }
        let removed = topics.index.len();
        topics.by_topic.clear();
        topics.index.clear();

        debug!(removed, "Unsubscribed from all topics");
    }

    /// Deliver an event to every subscriber of `topic`, in subscription order.
    ///
    /// A panicking callback is logged and counted; it never stops delivery to
    /// the remaining subscribers. Publishing to a topic without subscribers
    /// is a no-op.
    pub fn publish(&self, topic: &str, event: &Event) -> Delivery {
        let targets: Vec<(SubscriptionId, Handler, Arc<AtomicBool>)> = {
            let topics = self.lock();
            match topics.by_topic.get(topic) {
                Some(subs) => subs
                    .iter()
                    .map(|s| (s.id, Arc::clone(&s.handler), Arc::clone(&s.active)))
                    .collect(),
                None => {
                    trace!(topic = %topic, "No subscribers");
                    return Delivery::default();
                }
            }
        };

        let mut delivery = Delivery::default();
        for (id, handler, active) in targets {
            if !active.load(Ordering::Acquire) {
                continue;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivery.delivered += 1,
                Err(payload) => {
                    delivery.failed += 1;
                    warn!(
                        topic = %topic,
                        subscription = %id,
                        panic = %panic_message(payload.as_ref()),
                        "Subscriber panicked"
                    );
                }
            }
        }

        trace!(
            topic = %topic,
            delivered = delivery.delivered,
            failed = delivery.failed,
            "Published event"
        );
        delivery
    }

    /// Get the subscriber count for a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock().by_topic.get(topic).map_or(0, Vec::len)
    }

    /// Check if a registration is live.
    #[must_use]
    pub fn is_subscribed(&self, id: &SubscriptionId) -> bool {
        self.lock().index.contains_key(id)
    }

    /// Get all topics with subscribers.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.lock().by_topic.keys().cloned().collect()
    }

    /// Snapshot every live registration.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let topics = self.lock();
        topics
            .by_topic
            .iter()
            .flat_map(|(topic, subs)| {
                subs.iter().map(move |s| SubscriptionInfo {
                    id: s.id,
                    topic: topic.clone(),
                    options: s.options.clone(),
                    created_at: s.created_at,
                })
            })
            .collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let topics = self.lock();
        RegistryStats {
            topic_count: topics.by_topic.len(),
            subscription_count: topics.index.len(),
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation token for one registration.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    topic: String,
    topics: Arc<Mutex<Topics>>,
}

impl SubscriptionHandle {
    /// The registration's identity.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The topic it is registered under.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove exactly this registration. Idempotent.
    ///
    /// Once this returns the callback will not be invoked again, including by
    /// a dispatch pass that is already walking this topic.
    ///
    /// Returns `true` if the registration was still live.
    pub fn unsubscribe(&self) -> bool {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id)
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
