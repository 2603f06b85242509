//! Outbound gateway.
//!
//! Holds frames sent while the link is down and builds the handshake that
//! runs on every successful open: `authenticate` first, then `join_thread`
//! for every thread still joined, then the held frames in FIFO order.

use crate::config::OutboundPolicy;
use crate::metrics;
use ripple_protocol::{Envelope, PostId};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Result of offering a frame while disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Held for the next handshake.
    Queued,
    /// Held, and the oldest held frame was dropped to make room.
    QueuedEvictedOldest,
    /// Dropped under [`OutboundPolicy::Drop`].
    Dropped,
}

/// FIFO of frames waiting for an open link.
#[derive(Debug)]
pub struct OutboundGateway {
    policy: OutboundPolicy,
    max_queued: usize,
    queue: VecDeque<Envelope>,
}

impl OutboundGateway {
    #[must_use]
    pub fn new(policy: OutboundPolicy, max_queued: usize) -> Self {
        Self {
            policy,
            max_queued: max_queued.max(1),
            queue: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> OutboundPolicy {
        self.policy
    }

    /// Hold or drop a frame that cannot be sent right now.
    pub fn offer(&mut self, envelope: Envelope) -> Offer {
        let offer = match self.policy {
            OutboundPolicy::Drop => {
                warn!(kind = %envelope.kind(), "Not connected; dropping outbound frame");
                metrics::record_dropped_frame("disconnected");
                return Offer::Dropped;
            }
            OutboundPolicy::Queue if self.queue.len() >= self.max_queued => {
                if let Some(oldest) = self.queue.pop_front() {
                    warn!(
                        kind = %oldest.kind(),
                        max = self.max_queued,
                        "Outbound queue full; dropping oldest frame"
                    );
                    metrics::record_dropped_frame("queue_full");
                }
                Offer::QueuedEvictedOldest
            }
            OutboundPolicy::Queue => Offer::Queued,
        };

        debug!(kind = %envelope.kind(), depth = self.queue.len() + 1, "Queued outbound frame");
        self.queue.push_back(envelope);
        metrics::set_queue_depth(self.queue.len());
        offer
    }

    /// Take every held frame, oldest first.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let frames: Vec<Envelope> = self.queue.drain(..).collect();
        metrics::set_queue_depth(0);
        frames
    }

    /// Put unsent frames back at the front, keeping their order.
    pub fn requeue_front(&mut self, frames: impl IntoIterator<Item = Envelope>) {
        let frames: Vec<Envelope> = frames.into_iter().collect();
        for envelope in frames.into_iter().rev() {
            self.queue.push_front(envelope);
        }
        metrics::set_queue_depth(self.queue.len());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Frames sent right after the link opens, before any held frame.
///
/// Without a user the handshake is empty: there is nothing to authenticate
/// and thread joins carry the user id.
#[must_use]
pub fn handshake(user_id: Option<&str>, threads: &[PostId]) -> Vec<Envelope> {
    let Some(user_id) = user_id else {
        warn!("No current user; skipping authentication");
        return Vec::new();
    };

    let mut frames = Vec::with_capacity(threads.len() + 1);
    frames.push(Envelope::authenticate(user_id));

    let mut rejoined: Vec<&PostId> = Vec::with_capacity(threads.len());
    for post_id in threads {
        if !rejoined.contains(&post_id) {
            rejoined.push(post_id);
            frames.push(Envelope::join_thread(post_id, user_id));
        }
    }
    frames
}
