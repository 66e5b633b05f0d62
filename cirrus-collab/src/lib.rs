//! # cirrus-collab — Real-time presence and sync channel for Cirrus
//!
//! Keeps a live link to the collaboration backend, tracks who is viewing
//! which file or folder, relays cursor, comment and permission events, and
//! reports sync state and edit conflicts. When no backend can be reached the
//! session falls back to a local simulation so the UI keeps working.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  Command   ┌──────────────┐  Channel   ┌─────────────┐
//! │  Session    │ ─────────► │ Link driver  │ ◄────────► │  Backend    │
//! │  (facade)   │            │ + Reconnect  │  JSON/WS   │  (remote)   │
//! └──────▲──────┘            └──────┬───────┘            └─────────────┘
//!        │ snapshots                │ after 3 failed retries
//!        │                          ▼
//! ┌──────┴──────┐  publish   ┌──────────────┐
//! │ Registries  │ ◄───────── │  Dispatcher  │ ◄── SimulationEngine
//! │ presence /  │            │  (fan-out)   │
//! │ sync status │            └──────────────┘
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Event vocabulary and JSON wire codec
//! - [`transport`] — `Transport` trait, WebSocket and in-memory links
//! - [`reconnect`] — Backoff state machine with sticky simulation fallback
//! - [`simulation`] — Synthetic replies when offline
//! - [`dispatcher`] — Typed publish/subscribe with drop-to-unsubscribe
//! - [`presence`] — Per-resource collaborator sets and cursor colors
//! - [`sync_status`] — Per-file sync and conflict state
//! - [`membership`] — Resources the local user has joined
//! - [`link`] — The task that owns the connection
//! - [`session`] — Public facade
//!
//! ## Example
//!
//! ```no_run
//! use cirrus_collab::{EventKind, LocalUser, Session, SessionConfig};
//!
//! # async fn demo() {
//! let session = Session::connect(SessionConfig {
//!     server_url: "wss://collab.example.com/ws".into(),
//!     user: LocalUser::new("u-42", "Ada"),
//!     ..SessionConfig::default()
//! });
//! let _sub = session.subscribe(EventKind::UserJoined, |event| {
//!     println!("{event:?}");
//! });
//! session.join_resource("file-1");
//! session.request_sync("file-1");
//! # session.shutdown().await;
//! # }
//! ```

pub mod dispatcher;
pub mod link;
pub mod membership;
pub mod presence;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod simulation;
pub mod sync_status;
pub mod transport;

// Re-exports for convenience
pub use dispatcher::{DispatchStats, Dispatcher, Handler, Subscription};
pub use link::OfflineQueue;
pub use membership::{JoinedResource, Resource, ResourceKind};
pub use presence::{color_for_user, Collaborator, CursorColor, CursorState, PresenceRegistry, Vec2};
pub use protocol::{ConnectionMode, EventKind, InboundEvent, OutboundRequest, ProtocolError};
pub use reconnect::{Connection, ConnectionState, Decision, Link, ReconnectController, ReconnectPolicy};
pub use session::{LocalUser, Session, SessionConfig};
pub use simulation::{PendingReplies, SimulatedReply, SimulationConfig, SimulationEngine};
pub use sync_status::{describe_conflict, SyncState, SyncStatus, SyncStatusRegistry};
pub use transport::{Channel, Credentials, MemoryTransport, Transport, TransportError, WebSocketTransport};
