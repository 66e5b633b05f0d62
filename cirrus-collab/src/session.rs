//! Session facade: the surface the UI talks to.
//!
//! ```text
//! Session
//!   join_resource / post_comment / ...  ──Command──► link driver task
//!   presence()     ◄── RwLock<PresenceRegistry>   ◄──┐
//!   sync_status()  ◄── RwLock<SyncStatusRegistry> ◄──┼── Dispatcher
//!   subscribe()    ──────────────────────────────────┘
//!   connection()   ◄── watch<Connection>
//! ```
//!
//! Every call returns immediately. Effects arrive later as events, so callers
//! should subscribe or re-read snapshots rather than expect same-tick
//! visibility. Reads hand out clones and never panic on cold state.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dispatcher::{Dispatcher, Subscription};
use crate::link::{command_channel, Command, CommandSender, Driver, OfflineQueue, Rejected, EPHEMERAL_BACKLOG};
use crate::membership::{JoinedResource, Membership, Resource};
use crate::presence::{Collaborator, PresenceRegistry, Vec2};
use crate::protocol::{ConnectionMode, EventKind, InboundEvent, OutboundRequest};
use crate::reconnect::{Connection, ReconnectController, ReconnectPolicy};
use crate::simulation::{SimulationConfig, SimulationEngine};
use crate::sync_status::{SyncStatus, SyncStatusRegistry};
use crate::transport::{Credentials, Transport, WebSocketTransport};

/// The person using this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
}

impl LocalUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: None,
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Collaboration backend, `ws://` or `wss://`.
    pub server_url: String,
    pub user: LocalUser,
    /// Opaque bearer token forwarded to the backend.
    pub token: Option<String>,
    pub reconnect: ReconnectPolicy,
    pub simulation: SimulationConfig,
    /// WebSocket keep-alive ping interval.
    pub heartbeat_interval: Duration,
    /// Durable requests kept while no link is up.
    pub offline_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090/collab".to_string(),
            user: LocalUser::new("anonymous", "Anonymous"),
            token: None,
            reconnect: ReconnectPolicy::default(),
            simulation: SimulationConfig::default(),
            heartbeat_interval: Duration::from_secs(25),
            offline_queue_capacity: 1000,
        }
    }
}

const PRESENCE_EVENTS: [EventKind; 4] = [
    EventKind::UserJoined,
    EventKind::UserLeft,
    EventKind::CursorMoved,
    EventKind::UserTyping,
];

const SYNC_EVENTS: [EventKind; 2] = [EventKind::SyncStatus, EventKind::ConflictDetected];

/// A live presence session.
///
/// Dropping the session closes it.
pub struct Session {
    user: LocalUser,
    commands: CommandSender,
    dispatcher: Dispatcher,
    presence: Arc<RwLock<PresenceRegistry>>,
    sync: Arc<RwLock<SyncStatusRegistry>>,
    membership: Membership,
    connection: watch::Receiver<Connection>,
    closed: AtomicBool,
    driver: Option<JoinHandle<()>>,
    _registries: Vec<Subscription>,
}

impl Session {
    /// Start a session over `transport`. Must be called inside a tokio
    /// runtime; the link driver is spawned onto it.
    pub fn start<T: Transport>(config: SessionConfig, transport: T) -> Self {
        let dispatcher = Dispatcher::new();
        let presence = Arc::new(RwLock::new(PresenceRegistry::new()));
        let sync = Arc::new(RwLock::new(SyncStatusRegistry::new()));

        // Registries subscribe first so UI handlers observe applied state.
        let mut registries = Vec::with_capacity(PRESENCE_EVENTS.len() + SYNC_EVENTS.len() + 2);
        for kind in PRESENCE_EVENTS {
            let presence = Arc::clone(&presence);
            registries.push(dispatcher.subscribe(kind, move |event| presence.write().apply_event(event)));
        }
        // Remote users cannot announce a departure while the real link is
        // down. They go offline on loss and are pruned when the next link
        // comes up unless the backend re-announces them first.
        {
            let presence = Arc::clone(&presence);
            let local_id = config.user.id.clone();
            registries.push(dispatcher.subscribe(EventKind::Disconnect, move |event| {
                if let InboundEvent::Disconnect { mode: ConnectionMode::Real } = event {
                    let changed = presence.write().mark_remote_offline(&local_id);
                    log::debug!("Link lost: {changed} remote collaborators marked offline");
                }
            }));
        }
        {
            let presence = Arc::clone(&presence);
            registries.push(dispatcher.subscribe(EventKind::Connect, move |_| {
                let removed = presence.write().prune_offline();
                if removed > 0 {
                    log::debug!("Pruned {removed} collaborators not seen since the link dropped");
                }
            }));
        }
        for kind in SYNC_EVENTS {
            let sync = Arc::clone(&sync);
            registries.push(dispatcher.subscribe(kind, move |event| sync.write().apply_event(event)));
        }

        let membership = Membership::new();
        let (command_tx, command_rx) = command_channel(EPHEMERAL_BACKLOG);
        let (connection_tx, connection_rx) = watch::channel(Connection::default());

        let driver = Driver {
            transport: Arc::new(transport),
            credentials: Credentials {
                server_url: config.server_url.clone(),
                user_id: config.user.id.clone(),
                user_name: config.user.name.clone(),
                token: config.token.clone(),
            },
            controller: ReconnectController::new(config.reconnect.clone()),
            connection: connection_tx,
            dispatcher: dispatcher.clone(),
            membership: membership.clone(),
            queue: OfflineQueue::new(config.offline_queue_capacity),
            engine: SimulationEngine::new(config.simulation.clone(), config.user.clone()),
            commands: command_rx,
            announced: HashSet::new(),
        };

        log::info!("Starting session for {} against {}", config.user.id, config.server_url);
        let handle = tokio::spawn(driver.run());

        Self {
            user: config.user,
            commands: command_tx,
            dispatcher,
            presence,
            sync,
            membership,
            connection: connection_rx,
            closed: AtomicBool::new(false),
            driver: Some(handle),
            _registries: registries,
        }
    }

    /// Start a session against a WebSocket backend.
    pub fn connect(config: SessionConfig) -> Self {
        let transport = WebSocketTransport::new().with_heartbeat(config.heartbeat_interval);
        Self::start(config, transport)
    }

    pub fn user(&self) -> &LocalUser {
        &self.user
    }

    // ─── Membership ────────────────────────────────────────────

    /// Join a file or folder. Joining twice is a no-op.
    pub fn join_resource(&self, resource: impl Into<Resource>) {
        let resource = resource.into();
        if self.is_closed() {
            log::debug!("Join of {resource} after close ignored");
            return;
        }
        if !self.membership.join(&resource) {
            log::debug!("Already joined {resource}");
            return;
        }
        self.send(resource.join_request(&self.user.id));
    }

    /// Leave a file or folder. Leaving a resource never joined is a no-op.
    pub fn leave_resource(&self, resource: impl Into<Resource>) {
        let resource = resource.into();
        if self.is_closed() {
            log::debug!("Leave of {resource} after close ignored");
            return;
        }
        if !self.membership.leave(&resource) {
            log::debug!("Leave of {resource} ignored: not joined");
            return;
        }
        self.send(resource.leave_request(&self.user.id));
    }

    /// Resources this session has joined, oldest first.
    pub fn joined_resources(&self) -> Vec<JoinedResource> {
        self.membership.joined()
    }

    // ─── Outbound activity ─────────────────────────────────────

    /// Broadcast the local cursor. Best effort: dropped while offline.
    pub fn move_cursor(&self, resource_id: &str, position: Vec2) {
        if !self.membership.contains_id(resource_id) {
            log::debug!("Cursor for unjoined {resource_id} dropped");
            return;
        }
        self.send(OutboundRequest::CursorUpdate {
            resource_id: resource_id.to_string(),
            user_id: self.user.id.clone(),
            position,
        });
    }

    /// Broadcast the local typing state. Best effort like cursors.
    pub fn set_typing(&self, resource_id: &str, is_typing: bool, location: Option<String>) {
        if !self.membership.contains_id(resource_id) {
            log::debug!("Typing for unjoined {resource_id} dropped");
            return;
        }
        self.send(OutboundRequest::TypingUpdate {
            resource_id: resource_id.to_string(),
            user_id: self.user.id.clone(),
            is_typing,
            location,
        });
    }

    /// Post a comment. The echoed `comment_added` carries the stored form.
    pub fn post_comment(&self, resource_id: &str, comment: Value) {
        self.send(OutboundRequest::AddComment {
            resource_id: resource_id.to_string(),
            comment,
            user_id: self.user.id.clone(),
        });
    }

    /// Ask for a sync of `file_id`. Exactly one status update follows.
    pub fn request_sync(&self, file_id: &str) {
        self.send(OutboundRequest::RequestSync {
            file_id: file_id.to_string(),
            user_id: self.user.id.clone(),
        });
    }

    pub fn report_conflict(&self, file_id: &str, data: Value) {
        self.send(OutboundRequest::ReportConflict {
            file_id: file_id.to_string(),
            user_id: self.user.id.clone(),
            data,
        });
    }

    pub fn resolve_conflict(&self, file_id: &str, resolution: Value) {
        self.send(OutboundRequest::ResolveConflict {
            file_id: file_id.to_string(),
            user_id: self.user.id.clone(),
            resolution,
        });
    }

    /// Send a request kind this crate has no typed form for.
    ///
    /// The simulation does not answer these.
    pub fn send_custom(&self, kind: &str, payload: Value) {
        self.send(OutboundRequest::Custom {
            kind: kind.to_string(),
            user_id: self.user.id.clone(),
            payload,
        });
    }

    fn send(&self, request: OutboundRequest) {
        if self.is_closed() {
            log::debug!("{} after close ignored", request.kind());
            return;
        }
        match self.commands.send(Command::Send(request)) {
            Ok(()) => {}
            Err(Rejected::Backlogged(Command::Send(request))) => {
                log::trace!("{} shed: link driver backlogged", request.kind());
            }
            Err(Rejected::Stopped(Command::Send(request))) => {
                log::debug!("{} dropped: link driver stopped", request.kind());
            }
            Err(Rejected::Backlogged(Command::Shutdown) | Rejected::Stopped(Command::Shutdown)) => {}
        }
    }

    // ─── Reads ─────────────────────────────────────────────────

    /// Collaborators on `resource_id`, in join order.
    pub fn presence(&self, resource_id: &str) -> Vec<Collaborator> {
        self.presence.read().snapshot(resource_id)
    }

    /// Resources with at least one collaborator.
    pub fn active_resources(&self) -> Vec<String> {
        self.presence.read().resources()
    }

    pub fn sync_status(&self, file_id: &str) -> Option<SyncStatus> {
        self.sync.read().snapshot(file_id)
    }

    pub fn all_sync_statuses(&self) -> Vec<SyncStatus> {
        self.sync.read().all()
    }

    pub fn connection(&self) -> Connection {
        self.connection.borrow().clone()
    }

    /// Receiver that yields every connection change.
    pub fn watch_connection(&self) -> watch::Receiver<Connection> {
        self.connection.clone()
    }

    pub fn mode(&self) -> ConnectionMode {
        self.connection.borrow().mode()
    }

    // ─── Events ────────────────────────────────────────────────

    /// Subscribe to inbound events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(kind, handler)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // ─── Teardown ──────────────────────────────────────────────

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the session. Cancels any pending attempt, backoff or simulated
    /// reply. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("Closing session for {}", self.user.id);
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Close and wait for the link driver to finish.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                log::warn!("Link driver ended abnormally: {e}");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user.id)
            .field("connection", &*self.connection.borrow())
            .field("closed", &self.is_closed())
            .finish()
    }
}
