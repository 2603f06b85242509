//! Inbound message router.
//!
//! Decodes frames, runs the pre-processing for known event kinds, and fans
//! each frame out through the registry. Known kinds are delivered under
//! their literal `type` and, when the payload carries a post id, under the
//! derived per-thread topic as well, so a subscriber can listen either
//! globally or per thread.

use crate::event::Event;
use crate::presence::{InteractionRecord, InteractionStore};
use crate::registry::{Delivery, SubscriptionRegistry};
use chrono::Utc;
use ripple_protocol::{codec, topics, Envelope, EventKind, ProtocolError};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What happened to one inbound frame.
#[derive(Debug)]
pub enum RouteOutcome {
    /// The frame was decoded and fanned out.
    Routed(RouteReport),
    /// The frame could not be decoded and was dropped.
    Dropped(ProtocolError),
}

impl RouteOutcome {
    /// The report, if the frame was routed.
    #[must_use]
    pub fn report(&self) -> Option<&RouteReport> {
        match self {
            RouteOutcome::Routed(report) => Some(report),
            RouteOutcome::Dropped(_) => None,
        }
    }
}

/// Summary of one routed frame.
#[derive(Debug, Clone)]
pub struct RouteReport {
    /// Sequence number assigned to the frame.
    pub seq: u64,
    /// The frame's `type`.
    pub kind: String,
    /// Set when the type is a known event kind.
    pub known: Option<EventKind>,
    /// Topics the frame was broadcast under, in broadcast order.
    pub topics: Vec<String>,
    /// Combined delivery counts across all topics.
    pub delivery: Delivery,
}

/// The inbound router.
pub struct Router {
    registry: SubscriptionRegistry,
    interactions: InteractionStore,
    next_seq: AtomicU64,
}

impl Router {
    /// Create a router over a registry and an interaction store.
    #[must_use]
    pub fn new(registry: SubscriptionRegistry, interactions: InteractionStore) -> Self {
        Self {
            registry,
            interactions,
            next_seq: AtomicU64::new(1),
        }
    }

    /// The registry events are delivered through.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// The store `live_interaction` events are recorded in.
    #[must_use]
    pub fn interactions(&self) -> &InteractionStore {
        &self.interactions
    }

    /// Decode and route a raw text frame.
    ///
    /// Malformed frames are logged and dropped; they never reach subscribers.
    pub fn route_frame(&self, frame: &str) -> RouteOutcome {
        match codec::decode(frame) {
            Ok(envelope) => RouteOutcome::Routed(self.route(envelope)),
            Err(e) => {
                warn!(error = %e, len = frame.len(), "Dropping malformed frame");
                RouteOutcome::Dropped(e)
            }
        }
    }

    /// Route a decoded envelope.
    pub fn route(&self, envelope: Envelope) -> RouteReport {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (kind, data, timestamp) = envelope.into_parts();
        let known = EventKind::from_type(&kind);

        let mut targets = vec![kind.clone()];
        if let Some(event_kind) = known {
            self.preprocess(event_kind, &data);
            targets.extend(derived_topics(event_kind, &data));
        } else {
            trace!(kind = %kind, "Unrecognized event type, routing by literal type");
        }

        let event = Event {
            seq,
            topic: kind.clone(),
            kind: kind.clone(),
            data: Arc::new(data),
            timestamp,
            received_at: Utc::now(),
        };

        let mut delivery = Delivery::default();
        for topic in &targets {
            delivery += self.registry.publish(topic, &event.retopic(topic.as_str()));
        }

        debug!(
            seq,
            kind = %kind,
            topics = targets.len(),
            delivered = delivery.delivered,
            failed = delivery.failed,
            "Routed frame"
        );

        RouteReport {
            seq,
            kind,
            known,
            topics: targets,
            delivery,
        }
    }

    /// Side effects that run before fan-out. Never suppresses delivery.
    fn preprocess(&self, kind: EventKind, data: &Value) {
        match kind {
            EventKind::LiveInteraction => {
                match InteractionRecord::from_payload(data, self.interactions.ttl()) {
                    Some(record) => {
                        self.interactions.upsert(record);
                    }
                    None => debug!("live_interaction without post or user id, not recorded"),
                }
            }
            EventKind::NewComment
            | EventKind::NewPost
            | EventKind::UserTyping
            | EventKind::AiPostGenerated => {}
        }
    }
}

/// Extra topics a known event fans out to besides its literal type.
fn derived_topics(kind: EventKind, data: &Value) -> Vec<String> {
    let mut extra: Vec<String> = kind.context_topic(data).into_iter().collect();
    if kind == EventKind::AiPostGenerated && topics::is_ai_generated(data) {
        extra.push(topics::AI_POST.to_string());
    }
    extra
}
