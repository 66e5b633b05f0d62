//! In-process backend for tests and embedding.
//!
//! [`MemoryTransport`] is a cheap-to-clone handle: one clone is handed to the
//! session, the other stays with the test to steer the "backend" — refuse or
//! stall connection attempts, push inbound events into the live link, sever
//! it, and inspect what the client sent.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::{Channel, Credentials, Transport, TransportError};
use crate::protocol::{InboundEvent, OutboundRequest};

/// How the backend answers connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    /// Accept every attempt.
    Reachable,
    /// Fail every attempt immediately.
    Refusing,
    /// Never answer; only the caller's timeout ends the attempt.
    Hanging,
}

struct LiveLink {
    to_client: mpsc::Sender<InboundEvent>,
    from_client: mpsc::Receiver<OutboundRequest>,
    closed_by_client: oneshot::Receiver<()>,
}

struct MemoryState {
    reachability: Reachability,
    open_attempts: u32,
    link: Option<LiveLink>,
    sent: Vec<OutboundRequest>,
    last_credentials: Option<Credentials>,
}

impl MemoryState {
    /// Move everything the client sent on the live link into `sent`.
    fn drain_link(&mut self) {
        if let Some(link) = self.link.as_mut() {
            while let Ok(request) = link.from_client.try_recv() {
                self.sent.push(request);
            }
        }
    }
}

/// Transport whose backend lives in this process.
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    /// A backend that accepts connections.
    pub fn new() -> Self {
        Self::with_reachability(Reachability::Reachable)
    }

    /// A backend that refuses every connection.
    pub fn unreachable() -> Self {
        Self::with_reachability(Reachability::Refusing)
    }

    pub fn with_reachability(reachability: Reachability) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                reachability,
                open_attempts: 0,
                link: None,
                sent: Vec::new(),
                last_credentials: None,
            })),
        }
    }

    /// Change how future connection attempts are answered.
    pub fn set_reachability(&self, reachability: Reachability) {
        self.state.lock().reachability = reachability;
    }

    /// Number of `open` calls so far.
    pub fn open_attempts(&self) -> u32 {
        self.state.lock().open_attempts
    }

    /// Credentials presented by the latest attempt.
    pub fn last_credentials(&self) -> Option<Credentials> {
        self.state.lock().last_credentials.clone()
    }

    /// Whether a link is open and not closed by the client.
    pub fn is_linked(&self) -> bool {
        let mut state = self.state.lock();
        match state.link.as_mut() {
            Some(link) => matches!(
                link.closed_by_client.try_recv(),
                Err(oneshot::error::TryRecvError::Empty)
            ) && !link.to_client.is_closed(),
            None => false,
        }
    }

    /// Deliver an event to the client over the live link.
    ///
    /// Returns `false` when there is no live link.
    pub async fn push(&self, event: InboundEvent) -> bool {
        let sender = match self.state.lock().link.as_ref() {
            Some(link) => link.to_client.clone(),
            None => return false,
        };
        sender.send(event).await.is_ok()
    }

    /// Drop the live link as if the backend went away.
    pub fn sever(&self) {
        let mut state = self.state.lock();
        state.drain_link();
        state.link = None;
    }

    /// Every request received so far, across all links.
    pub fn sent(&self) -> Vec<OutboundRequest> {
        let mut state = self.state.lock();
        state.drain_link();
        state.sent.clone()
    }

    /// Received requests of a given wire kind.
    pub fn sent_of_kind(&self, kind: &str) -> Vec<OutboundRequest> {
        self.sent().into_iter().filter(|r| r.kind() == kind).collect()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    async fn open(&self, credentials: &Credentials) -> Result<Channel, TransportError> {
        let reachability = {
            let mut state = self.state.lock();
            state.open_attempts += 1;
            state.last_credentials = Some(credentials.clone());
            state.reachability
        };

        match reachability {
            Reachability::Refusing => return Err(TransportError::Refused),
            Reachability::Hanging => std::future::pending::<()>().await,
            Reachability::Reachable => {}
        }

        let (out_tx, out_rx) = mpsc::channel(1024);
        let (in_tx, in_rx) = mpsc::channel(1024);
        let (close_tx, close_rx) = oneshot::channel();

        let mut state = self.state.lock();
        // A new link replaces any previous one.
        state.drain_link();
        state.link = Some(LiveLink {
            to_client: in_tx,
            from_client: out_rx,
            closed_by_client: close_rx,
        });
        Ok(Channel::new(out_tx, in_rx).with_close_signal(close_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ConnectionMode;

    fn credentials() -> Credentials {
        Credentials {
            server_url: "memory://".into(),
            user_id: "u1".into(),
            user_name: "User One".into(),
            token: None,
        }
    }

    #[tokio::test]
    async fn test_open_and_exchange() {
        let backend = MemoryTransport::new();
        let mut channel = backend.open(&credentials()).await.unwrap();
        assert_eq!(backend.open_attempts(), 1);
        assert!(backend.is_linked());

        channel
            .send(OutboundRequest::RequestSync { file_id: "f".into(), user_id: "u1".into() })
            .await
            .unwrap();
        assert_eq!(backend.sent_of_kind("request_sync").len(), 1);

        assert!(backend.push(InboundEvent::Connect { mode: ConnectionMode::Real }).await);
        assert_eq!(
            channel.recv().await,
            Some(InboundEvent::Connect { mode: ConnectionMode::Real })
        );
    }

    #[tokio::test]
    async fn test_refusing_backend() {
        let backend = MemoryTransport::unreachable();
        assert_eq!(backend.open(&credentials()).await.unwrap_err(), TransportError::Refused);
        assert_eq!(backend.open_attempts(), 1);
        assert!(!backend.push(InboundEvent::SecurityAlert { message: "x".into() }).await);
    }

    #[tokio::test]
    async fn test_hanging_backend_never_answers() {
        let backend = MemoryTransport::with_reachability(Reachability::Hanging);
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            backend.open(&credentials()),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_sever_ends_link() {
        let backend = MemoryTransport::new();
        let mut channel = backend.open(&credentials()).await.unwrap();
        backend.sever();
        assert_eq!(channel.recv().await, None);
        assert!(!backend.is_linked());
    }

    #[tokio::test]
    async fn test_client_close_is_observed() {
        let backend = MemoryTransport::new();
        let channel = backend.open(&credentials()).await.unwrap();
        channel.close();
        assert!(!backend.is_linked());
    }

    #[tokio::test]
    async fn test_records_credentials() {
        let backend = MemoryTransport::new();
        let _channel = backend.open(&credentials()).await.unwrap();
        assert_eq!(backend.last_credentials().unwrap().user_id, "u1");
    }
}
