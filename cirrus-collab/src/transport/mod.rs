//! Channel transport: one logical link to the collaboration backend.
//!
//! A [`Transport`] only knows how to open a link. The opened [`Channel`]
//! carries outbound requests and inbound events over tokio channels, so the
//! link driver never touches sockets directly:
//!
//! ```text
//!            ┌───────────── Channel ─────────────┐
//! driver ──► │ outgoing: mpsc<OutboundRequest>   │ ──► writer task ──► backend
//! driver ◄── │ incoming: mpsc<InboundEvent>      │ ◄── reader task ◄── backend
//!            │ close:    oneshot<()>             │
//!            └───────────────────────────────────┘
//! ```
//!
//! `recv()` yielding `None` means the link was lost. The driver bounds every
//! `open` with a timeout, so implementations may block on the network.

pub mod memory;
pub mod websocket;

use std::future::Future;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{InboundEvent, OutboundRequest};

pub use memory::MemoryTransport;
pub use websocket::WebSocketTransport;

/// Identity presented to the backend when opening a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub server_url: String,
    pub user_id: String,
    pub user_name: String,
    pub token: Option<String>,
}

/// Errors raised while opening or using a link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("connection refused by backend")]
    Refused,
    #[error("connection attempt timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
}

/// Something that can open a link to the collaboration backend.
pub trait Transport: Send + Sync + 'static {
    /// Open a new link. Called once per connection attempt.
    fn open(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Channel, TransportError>> + Send;
}

/// Handle to an open link.
#[derive(Debug)]
pub struct Channel {
    outgoing: mpsc::Sender<OutboundRequest>,
    incoming: mpsc::Receiver<InboundEvent>,
    close: Option<oneshot::Sender<()>>,
}

impl Channel {
    /// Wrap the two halves of a link.
    pub fn new(
        outgoing: mpsc::Sender<OutboundRequest>,
        incoming: mpsc::Receiver<InboundEvent>,
    ) -> Self {
        Self {
            outgoing,
            incoming,
            close: None,
        }
    }

    /// Attach a signal fired on explicit local close.
    pub fn with_close_signal(mut self, close: oneshot::Sender<()>) -> Self {
        self.close = Some(close);
        self
    }

    /// Queue a request for the backend.
    ///
    /// Fails with [`TransportError::Closed`] once the writer side is gone;
    /// the request is handed back so the caller can buffer it.
    pub async fn send(&self, request: OutboundRequest) -> Result<(), (TransportError, OutboundRequest)> {
        self.outgoing
            .send(request)
            .await
            .map_err(|e| (TransportError::Closed, e.0))
    }

    /// Next inbound event, or `None` once the link is lost.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.incoming.recv().await
    }

    /// Explicit local close. Never triggers reconnection.
    pub fn close(mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
    }
}
