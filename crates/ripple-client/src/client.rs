//! The application-facing client.

use crate::config::ClientConfig;
use crate::connection::{ActorParts, Command, ConnectionActor, Shared};
use crate::error::ClientError;
use crate::status::{ConnectionStatus, StatusObserverId};
use crate::user::UserIdProvider;
use ripple_core::{
    Event, InteractionRecord, InteractionStore, RouteOutcome, Router, SubscriptionHandle,
    SubscriptionOptions, SubscriptionRegistry, ThreadHandlers, ThreadMembership,
};
use ripple_protocol::{Envelope, PostId};
use ripple_transport::{ConnectionState, Transport};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

enum Slot {
    Idle(ActorParts),
    Running {
        task: JoinHandle<ActorParts>,
        shutdown: oneshot::Sender<()>,
    },
    Failed,
}

struct ClientInner {
    shared: Arc<Shared>,
    actor: Mutex<Slot>,
}

/// A realtime connection plus the topic subscriptions multiplexed over it.
///
/// Each client is an independent context: its own connection state,
/// registry and interaction store. Cloning yields another handle to the
/// same client.
///
/// ```rust,ignore
/// let client = RealtimeClient::new(config, WebSocketTransport::default(), StaticUser::new("u1"));
/// let handle = client.subscribe("new_post", |event| println!("{}", event.data()))?;
/// client.connect().await?;
/// ```
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl RealtimeClient {
    /// Create a client. Nothing is opened until [`connect`](Self::connect).
    pub fn new<T, U>(config: ClientConfig, transport: T, user: U) -> Self
    where
        T: Transport + 'static,
        U: UserIdProvider + 'static,
    {
        let registry = SubscriptionRegistry::new();
        let interactions = InteractionStore::new(config.interaction_ttl());
        let router = Router::new(registry, interactions);

        let (commands, receiver) = mpsc::unbounded_channel();
        let parts = ActorParts { commands: receiver };
        let shared = Shared::new(config, Arc::new(transport), Arc::new(user), router, commands);

        Self {
            inner: Arc::new(ClientInner {
                shared: Arc::new(shared),
                actor: Mutex::new(Slot::Idle(parts)),
            }),
        }
    }

    /// The configuration the client was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.shared.config
    }

    /// Start connecting in the background.
    ///
    /// Returns immediately; progress is reported through status callbacks.
    /// Calling it while the connection task is running does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error only if a previous connection task panicked.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut slot = self.inner.actor.lock().await;

        let parts = match std::mem::replace(&mut *slot, Slot::Failed) {
            Slot::Running { task, shutdown } if !task.is_finished() => {
                *slot = Slot::Running { task, shutdown };
                debug!("Connection task already running");
                return Ok(());
            }
            Slot::Running { task, .. } => task
                .await
                .map_err(|e| ClientError::ActorFailed(e.to_string()))?,
            Slot::Idle(parts) => parts,
            Slot::Failed => {
                return Err(ClientError::ActorFailed(
                    "a previous connection task panicked".to_string(),
                ))
            }
        };

        let (shutdown, shutdown_rx) = oneshot::channel();
        let actor = ConnectionActor::new(Arc::clone(&self.inner.shared), parts, shutdown_rx);
        *slot = Slot::Running {
            task: tokio::spawn(actor.run()),
            shutdown,
        };
        Ok(())
    }

    /// Close the connection and stop reconnecting. Idempotent.
    ///
    /// Resolves once the connection task has stopped. Frames sent afterwards
    /// are held (or dropped, per policy) at once, until the next `connect`.
    pub async fn disconnect(&self) {
        let mut slot = self.inner.actor.lock().await;

        match std::mem::replace(&mut *slot, Slot::Failed) {
            Slot::Running { task, shutdown } => {
                // The task may have stopped on its own already.
                let _ = shutdown.send(());
                match task.await {
                    Ok(parts) => *slot = Slot::Idle(parts),
                    Err(e) => error!(error = %e, "Connection task failed"),
                }
            }
            other => *slot = other,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.shared.state.borrow()
    }

    /// Watch connection state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.state.subscribe()
    }

    /// Register a status callback (`connected`, `disconnected`,
    /// `connection_failed`).
    pub fn on_status<F>(&self, handler: F) -> StatusObserverId
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        self.inner.shared.status.on_status(handler)
    }

    pub fn remove_status_observer(&self, id: StatusObserverId) -> bool {
        self.inner.shared.status.remove(id)
    }

    /// Stream of status changes.
    #[must_use]
    pub fn status_events(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.inner.shared.status.subscribe()
    }

    /// Subscribe to a topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is invalid or the subscription limit
    /// is reached.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Result<SubscriptionHandle, ClientError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Ok(self.registry().subscribe(topic, handler)?)
    }

    /// Subscribe to a topic with caller-defined options.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    pub fn subscribe_with_options<F>(
        &self,
        topic: &str,
        options: SubscriptionOptions,
        handler: F,
    ) -> Result<SubscriptionHandle, ClientError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Ok(self.registry().subscribe_with_options(topic, options, handler)?)
    }

    /// Drop every subscription on every topic.
    pub fn unsubscribe_all(&self) {
        self.registry().unsubscribe_all();
    }

    /// Join a post's live thread: subscribe to its comments, typing and
    /// interactions, and announce the join to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry rejects the subscriptions; nothing
    /// is subscribed in that case.
    pub fn join_live_thread(
        &self,
        post_id: impl Into<PostId>,
        handlers: ThreadHandlers,
    ) -> Result<LiveThread, ClientError> {
        let post_id = post_id.into();
        let membership = ThreadMembership::join(self.registry(), post_id.clone(), handlers)?;

        if self.inner.shared.remember_thread(membership.id(), post_id.clone()) {
            self.inner.shared.submit(Command::JoinThread(post_id));
        }

        Ok(LiveThread {
            membership,
            shared: Arc::clone(&self.inner.shared),
        })
    }

    /// Tell the thread's participants whether the current user is typing.
    pub fn send_typing_indicator(&self, post_id: impl Into<PostId>, is_typing: bool) {
        let post_id = post_id.into();
        if let Some(user_id) = self.current_user("typing_indicator") {
            self.send_envelope(Envelope::typing_indicator(&post_id, &user_id, is_typing));
        }
    }

    /// Report a live interaction (view, reaction, ...) with a post.
    pub fn send_live_interaction(
        &self,
        post_id: impl Into<PostId>,
        interaction_type: &str,
        interaction_data: Value,
    ) {
        let post_id = post_id.into();
        if let Some(user_id) = self.current_user("live_interaction") {
            self.send_envelope(Envelope::live_interaction(
                &post_id,
                &user_id,
                interaction_type,
                interaction_data,
            ));
        }
    }

    /// Send an arbitrary `{type, data}` frame.
    pub fn send_message(&self, kind: impl Into<String>, data: Value) {
        self.send_envelope(Envelope::new(kind, data));
    }

    /// Send a prepared envelope. Never fails: while the link is down the
    /// frame is queued or dropped according to the outbound policy.
    pub fn send_envelope(&self, envelope: Envelope) {
        self.inner.shared.submit(Command::Send(envelope));
    }

    /// Frames held for the next handshake.
    #[must_use]
    pub fn queued_frames(&self) -> usize {
        self.inner.shared.queued_frames()
    }

    /// Number of users currently interacting with a post.
    #[must_use]
    pub fn interaction_count(&self, post_id: &PostId) -> usize {
        self.interactions().count(post_id)
    }

    /// Live interaction records for a post, oldest first.
    #[must_use]
    pub fn active_interactions(&self, post_id: &PostId) -> Vec<InteractionRecord> {
        self.interactions().list(post_id)
    }

    /// Route a frame as if it had arrived on the wire.
    pub fn inject_frame(&self, frame: &str) -> RouteOutcome {
        self.inner.shared.router.route_frame(frame)
    }

    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        self.inner.shared.router.registry()
    }

    #[must_use]
    pub fn interactions(&self) -> &InteractionStore {
        self.inner.shared.router.interactions()
    }

    fn current_user(&self, kind: &str) -> Option<String> {
        let user_id = self.inner.shared.user.current_user_id();
        if user_id.is_none() {
            warn!(kind, "No current user; dropping outbound frame");
        }
        user_id
    }
}

/// A joined live thread. Leaving cancels all three subscriptions at once.
///
/// Dropping the handle does not leave the thread.
pub struct LiveThread {
    membership: ThreadMembership,
    shared: Arc<Shared>,
}

impl LiveThread {
    /// Membership identity.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.membership.id()
    }

    #[must_use]
    pub fn post_id(&self) -> &PostId {
        self.membership.post_id()
    }

    #[must_use]
    pub fn has_left(&self) -> bool {
        self.membership.has_left()
    }

    /// Leave the thread. Idempotent; returns `true` on the first call.
    pub fn leave(&self) -> bool {
        if !self.membership.leave() {
            return false;
        }

        let post_id = self.membership.post_id();
        if self.shared.forget_thread(self.membership.id(), post_id) {
            self.shared.submit(Command::LeaveThread(post_id.clone()));
        }
        true
    }
}

impl std::fmt::Debug for LiveThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveThread")
            .field("membership", &self.membership)
            .finish()
    }
}
