//! The connection actor.
//!
//! One task per client owns the live [`Connection`] and the reconnect
//! counter. While it is online, sends reach it as commands; otherwise they
//! land in the shared outbound queue at once. Everything that suspends (opening the link,
//! waiting for frames, backoff sleeps) happens here; subscriber callbacks
//! run synchronously on this task as frames are routed.
//!
//! ```text
//!            ┌──────────── backoff ◀─────────────┐
//!            ▼                                   │ link lost
//! connect ─▶ Connecting ─▶ Open ─▶ handshake ─▶ pump
//!            │    ▲                               │ shutdown
//!            │    └── connect failed              ▼
//!            └─ attempts exhausted ─▶ connection_failed   Closing ─▶ Disconnected
//! ```

use crate::config::ClientConfig;
use crate::gateway::{self, OutboundGateway};
use crate::metrics;
use crate::status::{ConnectionStatus, StatusObservers};
use crate::user::UserIdProvider;
use ripple_core::{ReconnectState, RouteOutcome, Router};
use ripple_protocol::{codec, Envelope, PostId};
use ripple_transport::{Connection, ConnectionState, Transport, TransportError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// State shared between the client handle and its actor.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) user: Arc<dyn UserIdProvider>,
    pub(crate) router: Router,
    pub(crate) status: StatusObservers,
    pub(crate) state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedSender<Command>,
    threads: Mutex<Vec<(Uuid, PostId)>>,
    outbound: Mutex<Outbound>,
}

/// Held frames, plus whether the actor takes commands directly.
///
/// Both sit under one lock: a frame either joins the queue or goes down the
/// command channel, and the actor flips `online` while holding it.
struct Outbound {
    online: bool,
    gateway: OutboundGateway,
}

impl Shared {
    pub(crate) fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        user: Arc<dyn UserIdProvider>,
        router: Router,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let gateway = OutboundGateway::new(config.outbound_policy, config.max_queued_frames);
        Self {
            config,
            transport,
            user,
            router,
            status: StatusObservers::new(),
            state,
            commands,
            threads: Mutex::new(Vec::new()),
            outbound: Mutex::new(Outbound {
                online: false,
                gateway,
            }),
        }
    }

    fn outbound(&self) -> MutexGuard<'_, Outbound> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pass a command to the actor while it is online; otherwise hold or
    /// drop it now, per the outbound policy.
    pub(crate) fn submit(&self, command: Command) {
        let mut outbound = self.outbound();
        if !outbound.online {
            park(&mut outbound.gateway, command);
            return;
        }
        if let Err(e) = self.commands.send(command) {
            warn!("Connection task is gone; holding command");
            park(&mut outbound.gateway, e.0);
        }
    }

    /// Frames waiting for the next handshake.
    pub(crate) fn queued_frames(&self) -> usize {
        self.outbound().gateway.len()
    }

    fn threads(&self) -> MutexGuard<'_, Vec<(Uuid, PostId)>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a joined thread. Returns `true` if the post was not joined yet.
    pub(crate) fn remember_thread(&self, membership: Uuid, post_id: PostId) -> bool {
        let mut threads = self.threads();
        let first = !threads.iter().any(|(_, joined)| *joined == post_id);
        threads.push((membership, post_id));
        first
    }

    /// Forget a left thread. Returns `true` if no membership for the post remains.
    pub(crate) fn forget_thread(&self, membership: Uuid, post_id: &PostId) -> bool {
        let mut threads = self.threads();
        threads.retain(|(id, _)| *id != membership);
        !threads.iter().any(|(_, joined)| joined == post_id)
    }

    fn joined_posts(&self) -> Vec<PostId> {
        self.threads().iter().map(|(_, post_id)| post_id.clone()).collect()
    }

    fn is_joined(&self, post_id: &PostId) -> bool {
        self.threads().iter().any(|(_, joined)| joined == post_id)
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            debug!(state = %state, "Connection state changed");
            metrics::set_connection_state(state);
        }
    }
}

/// Requests from the client handle.
#[derive(Debug)]
pub(crate) enum Command {
    Send(Envelope),
    JoinThread(PostId),
    LeaveThread(PostId),
}

/// What a stopped actor hands back so the next `connect` can resume.
pub(crate) struct ActorParts {
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
}

enum Step {
    Shutdown,
    Inbound(Result<Option<String>, TransportError>),
    Command(Command),
    Sweep,
}

enum Attempt {
    Open(Box<dyn Connection>),
    Failed,
    Shutdown,
}

enum Exit {
    Shutdown,
    LinkLost,
}

pub(crate) struct ConnectionActor {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    reconnect: ReconnectState,
    shutdown: oneshot::Receiver<()>,
    /// Threads joined on the current link.
    announced: HashSet<PostId>,
}

impl ConnectionActor {
    pub(crate) fn new(
        shared: Arc<Shared>,
        parts: ActorParts,
        shutdown: oneshot::Receiver<()>,
    ) -> Self {
        let reconnect = ReconnectState::new(shared.config.reconnect_policy());
        Self {
            shared,
            commands: parts.commands,
            reconnect,
            shutdown,
            announced: HashSet::new(),
        }
    }

    /// Run until shut down or until reconnection gives up.
    pub(crate) async fn run(mut self) -> ActorParts {
        let mut sweep = time::interval(self.shared.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut retry = false;
        loop {
            if retry && !self.wait_backoff(&mut sweep).await {
                break;
            }
            retry = true;

            let mut conn = match self.establish(&mut sweep).await {
                Attempt::Open(conn) => conn,
                Attempt::Failed => continue,
                Attempt::Shutdown => break,
            };

            self.reconnect.reset();
            self.shared.set_state(ConnectionState::Open);
            info!(connection = %conn.id(), transport = self.shared.transport.name(), "Connected");
            self.shared.status.emit(ConnectionStatus::Connected);

            let exit = match self.handshake(conn.as_mut()).await {
                Ok(()) => self.pump(conn.as_mut(), &mut sweep).await,
                Err(e) => {
                    warn!(connection = %conn.id(), error = %e, "Handshake failed");
                    Exit::LinkLost
                }
            };

            match exit {
                Exit::Shutdown => {
                    self.go_offline();
                    self.shared.set_state(ConnectionState::Closing);
                    if let Err(e) = conn.close().await {
                        debug!(connection = %conn.id(), error = %e, "Close failed");
                    }
                    self.shared.set_state(ConnectionState::Disconnected);
                    info!(connection = %conn.id(), "Disconnected");
                    self.shared.status.emit(ConnectionStatus::Disconnected);
                    break;
                }
                Exit::LinkLost => {
                    self.go_offline();
                    if let Err(e) = conn.close().await {
                        debug!(connection = %conn.id(), error = %e, "Close failed");
                    }
                    self.shared.set_state(ConnectionState::Disconnected);
                    self.shared.status.emit(ConnectionStatus::Disconnected);
                }
            }
        }

        self.go_offline();
        self.shared.set_state(ConnectionState::Disconnected);
        ActorParts {
            commands: self.commands,
        }
    }

    /// One connect attempt.
    async fn establish(&mut self, sweep: &mut Interval) -> Attempt {
        let transport = Arc::clone(&self.shared.transport);
        let endpoint = self.shared.config.endpoint_url.clone();

        self.shared.set_state(ConnectionState::Connecting);
        debug!(
            endpoint = %endpoint,
            transport = transport.name(),
            attempt = self.reconnect.attempt(),
            "Connecting"
        );

        let connect = transport.connect(&endpoint);
        tokio::pin!(connect);

        let result = loop {
            tokio::select! {
                biased;
                _ = &mut self.shutdown => {
                    self.shared.set_state(ConnectionState::Disconnected);
                    return Attempt::Shutdown;
                }
                result = &mut connect => break result,
                _ = sweep.tick() => self.sweep(),
            }
        };

        match result {
            Ok(conn) => Attempt::Open(conn),
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Connect failed");
                Attempt::Failed
            }
        }
    }

    /// Sleep out the next backoff delay. Returns `false` when the actor
    /// should stop: on shutdown, or once the attempts are exhausted.
    async fn wait_backoff(&mut self, sweep: &mut Interval) -> bool {
        self.shared.set_state(ConnectionState::Disconnected);

        let Some(delay) = self.reconnect.next_delay() else {
            error!(
                attempts = self.reconnect.attempt(),
                "Reconnection attempts exhausted, giving up"
            );
            self.shared.status.emit(ConnectionStatus::ConnectionFailed);
            return false;
        };

        metrics::record_reconnect_attempt();
        info!(
            attempt = self.reconnect.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );

        let sleep = time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = &mut self.shutdown => return false,
                () = &mut sleep => return true,
                _ = sweep.tick() => self.sweep(),
            }
        }
    }

    /// Authenticate, rejoin threads, then flush held frames in order.
    async fn handshake(&mut self, conn: &mut dyn Connection) -> Result<(), TransportError> {
        let user_id = self.shared.user.current_user_id();

        // From here on sends arrive as commands, behind everything taken now.
        let (joined, pending) = {
            let mut outbound = self.shared.outbound();
            outbound.online = true;
            (self.shared.joined_posts(), outbound.gateway.drain())
        };

        self.announced.clear();
        let frames = gateway::handshake(user_id.as_deref(), &joined);
        if user_id.is_some() {
            self.announced.extend(joined);
        }

        for envelope in &frames {
            if let Err(e) = transmit(conn, envelope).await {
                self.shared.outbound().gateway.requeue_front(pending);
                return Err(e);
            }
        }

        if !pending.is_empty() {
            debug!(count = pending.len(), "Flushing queued frames");
        }
        let mut pending = pending.into_iter();
        while let Some(envelope) = pending.next() {
            if let Err(e) = transmit(conn, &envelope).await {
                self.shared
                    .outbound()
                    .gateway
                    .requeue_front(std::iter::once(envelope).chain(pending));
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stop taking commands directly. Commands already in the channel were
    /// sent before anything held from now on, so they are held first.
    fn go_offline(&mut self) {
        let mut outbound = self.shared.outbound();
        outbound.online = false;
        while let Ok(command) = self.commands.try_recv() {
            park(&mut outbound.gateway, command);
        }
    }

    async fn pump(&mut self, conn: &mut dyn Connection, sweep: &mut Interval) -> Exit {
        loop {
            let step = tokio::select! {
                biased;
                _ = &mut self.shutdown => Step::Shutdown,
                Some(command) = self.commands.recv() => Step::Command(command),
                inbound = conn.recv() => Step::Inbound(inbound),
                _ = sweep.tick() => Step::Sweep,
            };

            match step {
                Step::Shutdown => return Exit::Shutdown,
                Step::Inbound(Ok(Some(frame))) => self.dispatch(&frame),
                Step::Inbound(Err(TransportError::Malformed(reason))) => {
                    warn!(connection = %conn.id(), reason = %reason, "Dropping malformed frame");
                    metrics::record_dropped_frame("malformed");
                }
                Step::Inbound(Ok(None)) => {
                    info!(connection = %conn.id(), "Server closed the connection");
                    return Exit::LinkLost;
                }
                Step::Inbound(Err(e)) => {
                    warn!(connection = %conn.id(), error = %e, "Connection lost");
                    return Exit::LinkLost;
                }
                Step::Command(command) => {
                    if let Err(e) = self.online(conn, command).await {
                        warn!(connection = %conn.id(), error = %e, "Send failed");
                        return Exit::LinkLost;
                    }
                }
                Step::Sweep => self.sweep(),
            }
        }
    }

    fn dispatch(&self, frame: &str) {
        metrics::record_frame(frame.len(), "inbound");
        match self.shared.router.route_frame(frame) {
            RouteOutcome::Routed(report) => {
                metrics::record_handler_failures(report.delivery.failed);
                trace!(
                    seq = report.seq,
                    kind = %report.kind,
                    delivered = report.delivery.delivered,
                    "Routed frame"
                );
            }
            RouteOutcome::Dropped(_) => metrics::record_dropped_frame("malformed"),
        }
    }

    async fn online(
        &mut self,
        conn: &mut dyn Connection,
        command: Command,
    ) -> Result<(), TransportError> {
        match command {
            Command::Send(envelope) => {
                if let Err(e) = transmit(conn, &envelope).await {
                    self.shared.outbound().gateway.offer(envelope);
                    return Err(e);
                }
                Ok(())
            }
            Command::JoinThread(post_id) => {
                // The handshake may have joined it already, or it was left since.
                if self.announced.contains(&post_id) || !self.shared.is_joined(&post_id) {
                    trace!(post = %post_id, "Join needs no announcement");
                    return Ok(());
                }
                let user_id = self.shared.user.current_user_id();
                if user_id.is_some() {
                    self.announced.insert(post_id.clone());
                }
                announce(conn, user_id, &post_id, Envelope::join_thread).await
            }
            Command::LeaveThread(post_id) => {
                if !self.announced.remove(&post_id) {
                    trace!(post = %post_id, "Leave needs no announcement");
                    return Ok(());
                }
                let user_id = self.shared.user.current_user_id();
                announce(conn, user_id, &post_id, Envelope::leave_thread).await
            }
        }
    }

    fn sweep(&self) {
        let expired = self.shared.router.interactions().prune_expired();
        if !expired.is_empty() {
            debug!(count = expired.len(), "Evicted expired interactions");
            metrics::record_expired_interactions(expired.len());
        }
    }
}

/// Hold or drop a command that arrived while the link is down.
fn park(gateway: &mut OutboundGateway, command: Command) {
    match command {
        Command::Send(envelope) => {
            gateway.offer(envelope);
        }
        Command::JoinThread(post_id) => {
            debug!(post = %post_id, "Not connected; join deferred to handshake");
        }
        Command::LeaveThread(post_id) => {
            debug!(post = %post_id, "Not connected; leave needs no announcement");
        }
    }
}

async fn announce(
    conn: &mut dyn Connection,
    user_id: Option<String>,
    post_id: &PostId,
    build: fn(&PostId, &str) -> Envelope,
) -> Result<(), TransportError> {
    match user_id {
        Some(user_id) => transmit(conn, &build(post_id, &user_id)).await,
        None => {
            debug!(post = %post_id, "No current user; thread change not announced");
            Ok(())
        }
    }
}

async fn transmit(conn: &mut dyn Connection, envelope: &Envelope) -> Result<(), TransportError> {
    let frame = match codec::encode(envelope) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(kind = %envelope.kind(), error = %e, "Dropping unencodable frame");
            metrics::record_dropped_frame("encode");
            return Ok(());
        }
    };

    let len = frame.len();
    conn.send(frame).await?;
    metrics::record_frame(len, "outbound");
    trace!(kind = %envelope.kind(), len, "Sent frame");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::StaticUser;
    use ripple_core::{InteractionStore, SubscriptionRegistry};
    use ripple_transport::MockTransport;
    use serde_json::{json, Value};

    fn actor(transport: &MockTransport) -> (Arc<Shared>, ConnectionActor, oneshot::Sender<()>) {
        let config = ClientConfig::default();
        let router = Router::new(
            SubscriptionRegistry::new(),
            InteractionStore::new(config.interaction_ttl()),
        );
        let (commands, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(
            config,
            Arc::new(transport.clone()),
            Arc::new(StaticUser::new("u1")),
            router,
            commands,
        ));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let actor = ConnectionActor::new(
            Arc::clone(&shared),
            ActorParts { commands: receiver },
            shutdown_rx,
        );
        (shared, actor, shutdown)
    }

    #[tokio::test]
    async fn test_join_rejoined_by_handshake_is_sent_once() {
        let transport = MockTransport::new();
        let (shared, actor, shutdown) = actor(&transport);
        let post_id = PostId::from(42u64);

        // The join command is still in the channel when the link opens.
        shared.remember_thread(Uuid::new_v4(), post_id.clone());
        shared.commands.send(Command::JoinThread(post_id)).unwrap();
        shared
            .commands
            .send(Command::Send(Envelope::new("sentinel", json!({}))))
            .unwrap();

        let task = tokio::spawn(actor.run());
        let mut peer = transport.accept().await.unwrap();

        let mut kinds = Vec::new();
        for _ in 0..3 {
            let frame: Value = serde_json::from_str(&peer.recv().await.unwrap()).unwrap();
            kinds.push(frame["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds, ["authenticate", "join_thread", "sentinel"]);

        shutdown.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(peer.recv().await, None);
    }

    #[test]
    fn test_submit_applies_policy_while_offline() {
        let transport = MockTransport::new();
        let (shared, _actor, _shutdown) = actor(&transport);

        for n in 0..2000 {
            shared.submit(Command::Send(Envelope::new(format!("m{}", n), json!({}))));
        }
        assert_eq!(shared.queued_frames(), shared.config.max_queued_frames);
    }
}
