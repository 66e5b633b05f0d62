//! Link driver: the one task that owns the connection.
//!
//! ```text
//!  Session ──Command──► ┌──────────── Driver ────────────┐
//!                       │ ReconnectController            │
//!                       │ OfflineQueue   announced set   │
//!                       │                                │ ──► Channel (real)
//!                       │ Link::Real ◄─or─► Link::Simulated ──► SimulationEngine
//!                       └───────────────┬────────────────┘
//!                                       ▼
//!                         Dispatcher::publish(event) ──► registries, UI
//! ```
//!
//! Every inbound event, real or simulated, is published from this task, so
//! registry updates are serialized without further locking discipline. Each
//! await point (open, backoff, live receive, pending simulated replies) is
//! raced against the command channel, so shutdown cancels whatever is in
//! flight.
//!
//! While no link is up, durable requests wait in the [`OfflineQueue`] and are
//! flushed on connect (or through the simulation engine on fallback). Cursor
//! and typing updates are dropped. Joins and leaves are not queued: the
//! shared [`Membership`] is replayed whenever a link comes up, and the
//! driver tracks what it announced on the current link so no resource is
//! joined twice on the wire.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::dispatcher::Dispatcher;
use crate::membership::{Membership, Resource};
use crate::protocol::{ConnectionMode, InboundEvent, OutboundRequest};
use crate::reconnect::{Connection, ConnectionState, Decision, Link, ReconnectController};
use crate::simulation::{PendingReplies, SimulationEngine};
use crate::transport::{Channel, Credentials, Transport, TransportError};

/// Instructions from the session to its driver.
#[derive(Debug)]
pub(crate) enum Command {
    Send(OutboundRequest),
    Shutdown,
}

impl Command {
    fn is_ephemeral(&self) -> bool {
        matches!(self, Command::Send(request) if request.is_ephemeral())
    }
}

/// Cursor and typing updates allowed to wait for the driver at once.
pub(crate) const EPHEMERAL_BACKLOG: usize = 256;

/// Why a command never reached the driver.
#[derive(Debug)]
pub(crate) enum Rejected {
    /// The driver task has exited.
    Stopped(Command),
    /// Too many cursor or typing updates are already waiting.
    Backlogged(Command),
}

/// Command channel whose ephemeral traffic is capped at `ephemeral_limit`.
///
/// Durable requests are never shed here; the offline queue bounds them once
/// the driver has them.
pub(crate) fn command_channel(ephemeral_limit: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let waiting = Arc::new(AtomicUsize::new(0));
    (
        CommandSender {
            tx,
            waiting: Arc::clone(&waiting),
            ephemeral_limit,
        },
        CommandReceiver { rx, waiting },
    )
}

#[derive(Debug)]
pub(crate) struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
    waiting: Arc<AtomicUsize>,
    ephemeral_limit: usize,
}

impl CommandSender {
    pub(crate) fn send(&self, command: Command) -> Result<(), Rejected> {
        let ephemeral = command.is_ephemeral();
        if ephemeral && self.waiting.fetch_add(1, Ordering::AcqRel) >= self.ephemeral_limit {
            self.waiting.fetch_sub(1, Ordering::AcqRel);
            return Err(Rejected::Backlogged(command));
        }
        self.tx.send(command).map_err(|e| {
            if ephemeral {
                self.waiting.fetch_sub(1, Ordering::AcqRel);
            }
            Rejected::Stopped(e.0)
        })
    }
}

pub(crate) struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<Command>,
    waiting: Arc<AtomicUsize>,
}

impl CommandReceiver {
    /// Cancel safe: nothing happens after the inner receive completes but
    /// bookkeeping.
    pub(crate) async fn recv(&mut self) -> Option<Command> {
        let command = self.rx.recv().await?;
        if command.is_ephemeral() {
            self.waiting.fetch_sub(1, Ordering::AcqRel);
        }
        Some(command)
    }
}

/// Bounded FIFO of requests made while no link was up.
#[derive(Debug)]
pub struct OfflineQueue {
    queue: VecDeque<OutboundRequest>,
    max_size: usize,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue a request for later delivery. Returns `false` when full.
    pub fn enqueue(&mut self, request: OutboundRequest) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(request);
        true
    }

    /// Take every queued request, oldest first.
    pub fn drain(&mut self) -> Vec<OutboundRequest> {
        self.queue.drain(..).collect()
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is waiting for a link.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Discard every queued request.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

enum Step {
    Open,
    Wait(Duration),
    Serve(Link<Channel, PendingReplies>),
    Simulate,
    Done,
}

/// Both arms deliver requests and yield inbound events the same way.
impl Link<Channel, PendingReplies> {
    async fn send(
        &mut self,
        request: OutboundRequest,
        engine: &SimulationEngine,
    ) -> Result<(), (TransportError, OutboundRequest)> {
        match self {
            Link::Real(channel) => channel.send(request).await,
            Link::Simulated(pending) => {
                if let Some(reply) = engine.handle(&request) {
                    pending.schedule(reply);
                }
                Ok(())
            }
        }
    }

    /// `None` means the link was lost. A simulated link is never lost.
    async fn recv(&mut self) -> Option<InboundEvent> {
        match self {
            Link::Real(channel) => channel.recv().await,
            Link::Simulated(pending) => Some(pending.next().await),
        }
    }

    fn close(self) {
        match self {
            Link::Real(channel) => channel.close(),
            Link::Simulated(mut pending) => pending.cancel_all(),
        }
    }
}

pub(crate) struct Driver<T: Transport> {
    pub(crate) transport: Arc<T>,
    pub(crate) credentials: Credentials,
    pub(crate) controller: ReconnectController,
    pub(crate) connection: watch::Sender<Connection>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) membership: Membership,
    pub(crate) queue: OfflineQueue,
    pub(crate) engine: SimulationEngine,
    pub(crate) commands: CommandReceiver,
    pub(crate) announced: HashSet<Resource>,
}

impl<T: Transport> Driver<T> {
    pub(crate) async fn run(mut self) {
        let mut step = Step::Open;
        loop {
            step = match step {
                Step::Open => self.open().await,
                Step::Wait(delay) => self.wait(delay).await,
                Step::Serve(link) => self.serve(link).await,
                Step::Simulate => self.simulate(),
                Step::Done => break,
            };
        }
        self.teardown();
    }

    // ─── Connecting ────────────────────────────────────────────

    async fn open(&mut self) -> Step {
        if !self.controller.begin_attempt() {
            return Step::Done;
        }
        self.publish_connection();
        log::info!(
            "Connecting to {} (attempt {})",
            self.credentials.server_url,
            self.controller.connection().attempt + 1
        );

        let transport = Arc::clone(&self.transport);
        let credentials = self.credentials.clone();
        let open_timeout = self.controller.policy().open_timeout;
        let attempt = async move {
            match tokio::time::timeout(open_timeout, transport.open(&credentials)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            }
        };
        tokio::pin!(attempt);

        let outcome = loop {
            tokio::select! {
                result = &mut attempt => break result,
                command = self.commands.recv() => {
                    if !self.on_offline_command(command) {
                        return Step::Done;
                    }
                }
            }
        };

        match outcome {
            Ok(channel) => {
                self.controller.on_connected();
                self.publish_connection();
                log::info!("Connected to {}", self.credentials.server_url);
                Step::Serve(Link::Real(channel))
            }
            Err(e) => {
                log::warn!("Connection attempt failed: {e}");
                self.dispatcher.publish(&InboundEvent::ConnectionFailed {
                    mode: ConnectionMode::Real,
                    reason: Some(e.to_string()),
                });
                self.after_failure(&e)
            }
        }
    }

    fn after_failure(&mut self, error: &TransportError) -> Step {
        let decision = self.controller.on_failure(error);
        self.publish_connection();
        match decision {
            Decision::Retry(delay) => {
                log::info!(
                    "Retrying in {delay:?} (attempt {} of {})",
                    self.controller.connection().attempt,
                    self.controller.policy().max_attempts
                );
                Step::Wait(delay)
            }
            Decision::Simulate => Step::Simulate,
            Decision::Stop => Step::Done,
        }
    }

    async fn wait(&mut self, delay: Duration) -> Step {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Step::Open,
                command = self.commands.recv() => {
                    if !self.on_offline_command(command) {
                        return Step::Done;
                    }
                }
            }
        }
    }

    fn simulate(&mut self) -> Step {
        self.controller.enter_simulated();
        self.publish_connection();
        log::warn!(
            "Backend {} unreachable; continuing in simulation mode",
            self.credentials.server_url
        );
        Step::Serve(Link::Simulated(PendingReplies::new()))
    }

    /// Handle a command while no link is up. Returns `false` on shutdown.
    fn on_offline_command(&mut self, command: Option<Command>) -> bool {
        match command {
            Some(Command::Send(request)) => {
                self.buffer(request);
                true
            }
            Some(Command::Shutdown) | None => false,
        }
    }

    fn buffer(&mut self, request: OutboundRequest) {
        if request.is_membership() {
            // Replayed from membership once a link is up.
            return;
        }
        if request.is_ephemeral() {
            log::debug!("Dropping {} while offline", request.kind());
            return;
        }
        let kind = request.kind().to_string();
        if !self.queue.enqueue(request) {
            log::warn!("Offline queue full; dropping {kind}");
        }
    }

    // ─── Linked ────────────────────────────────────────────────

    async fn serve(&mut self, mut link: Link<Channel, PendingReplies>) -> Step {
        self.dispatcher.publish(&InboundEvent::Connect { mode: link.mode() });

        let backlog = self.backlog();
        if !backlog.is_empty() {
            log::info!("Replaying {} requests", backlog.len());
        }
        if let Err(e) = self.deliver_all(&mut link, backlog).await {
            return self.link_lost(&e);
        }

        loop {
            tokio::select! {
                event = link.recv() => match event {
                    Some(event) => self.deliver_inbound(&event),
                    None => return self.link_lost(&TransportError::Closed),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(request)) => {
                        let Some(request) = self.announce(request) else { continue };
                        if let Err((e, request)) = link.send(request, &self.engine).await {
                            self.buffer(request);
                            return self.link_lost(&e);
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        link.close();
        Step::Done
    }

    /// Joins for every member resource followed by queued requests.
    fn backlog(&mut self) -> Vec<OutboundRequest> {
        self.announced.clear();
        let mut backlog = Vec::new();
        for resource in self.membership.resources() {
            backlog.push(resource.join_request(&self.credentials.user_id));
            self.announced.insert(resource);
        }
        backlog.extend(self.queue.drain());
        backlog
    }

    /// Send `requests` in order. On failure the unsent remainder is buffered.
    async fn deliver_all(
        &mut self,
        link: &mut Link<Channel, PendingReplies>,
        requests: Vec<OutboundRequest>,
    ) -> Result<(), TransportError> {
        let mut requests = requests.into_iter();
        while let Some(request) = requests.next() {
            if let Err((e, request)) = link.send(request, &self.engine).await {
                self.buffer(request);
                for rest in requests {
                    self.buffer(rest);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Filter membership requests against what this link already announced.
    fn announce(&mut self, request: OutboundRequest) -> Option<OutboundRequest> {
        let Some(resource) = Resource::of_request(&request) else {
            return Some(request);
        };
        let is_join = matches!(
            request,
            OutboundRequest::JoinFile { .. } | OutboundRequest::JoinFolder { .. }
        );
        if is_join {
            if !self.membership.contains(&resource) || !self.announced.insert(resource) {
                return None;
            }
        } else if !self.announced.remove(&resource) {
            return None;
        }
        Some(request)
    }

    fn link_lost(&mut self, error: &TransportError) -> Step {
        log::warn!("Link to {} lost: {error}", self.credentials.server_url);
        self.announced.clear();
        self.dispatcher.publish(&InboundEvent::Disconnect { mode: ConnectionMode::Real });
        self.after_failure(error)
    }

    fn deliver_inbound(&self, event: &InboundEvent) {
        log::debug!("Inbound {}", event.kind());
        self.dispatcher.publish(event);
    }

    // ─── Teardown ──────────────────────────────────────────────

    fn publish_connection(&self) {
        self.connection.send_replace(self.controller.connection().clone());
    }

    fn teardown(&mut self) {
        let linked = matches!(
            self.controller.state(),
            ConnectionState::Connected | ConnectionState::Simulated
        );
        let mode = self.controller.connection().mode();

        self.controller.on_local_close();
        self.publish_connection();
        if linked {
            self.dispatcher.publish(&InboundEvent::Disconnect { mode });
        }
        if !self.queue.is_empty() {
            log::debug!("Discarding {} queued requests", self.queue.len());
            self.queue.clear();
        }
        log::info!("Session link closed");
    }
}
