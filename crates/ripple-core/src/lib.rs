//! # ripple-core
//!
//! Transport-independent building blocks of the Ripple realtime client.
//!
//! - **Registry** - topic to subscriber fan-out with per-subscription cancellation
//! - **Router** - decodes inbound frames and broadcasts them to generic and per-thread topics
//! - **Presence** - short-lived interaction records with TTL expiry
//! - **Backoff** - reconnection delay policy
//! - **Thread** - the three-subscription bundle behind a joined live thread
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   frames    │────▶│   Router    │────▶│  Registry   │──▶ handlers
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Presence   │
//!                     └─────────────┘
//! ```

pub mod backoff;
pub mod event;
pub mod presence;
pub mod registry;
pub mod router;
pub mod thread;

pub use backoff::{backoff, ReconnectPolicy, ReconnectState};
pub use event::Event;
pub use presence::{InteractionKey, InteractionRecord, InteractionStore};
pub use registry::{
    Delivery, Handler, RegistryConfig, RegistryError, RegistryStats, SubscriptionHandle,
    SubscriptionId, SubscriptionInfo, SubscriptionOptions, SubscriptionRegistry,
};
pub use router::{RouteOutcome, RouteReport, Router};
pub use thread::{ThreadHandlers, ThreadMembership};
