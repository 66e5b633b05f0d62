//! Local stand-in for the collaboration backend.
//!
//! When no backend is reachable the session answers its own requests: each
//! known request kind produces one synthetic inbound event after a short
//! fixed delay, so UI code sees the same shapes and roughly the same timing
//! as with a real backend. Other users never appear in simulation.
//!
//! | request                    | reply                         |
//! |----------------------------|-------------------------------|
//! | join_file / join_folder    | user_joined (local user)      |
//! | leave_file / leave_folder  | user_left (local user)        |
//! | cursor_update              | cursor_moved                  |
//! | typing_update              | user_typing                   |
//! | add_comment                | comment_added (with an id)    |
//! | request_sync               | sync_status synced            |
//! | report_conflict            | sync_status conflict          |
//! | resolve_conflict           | sync_status synced            |
//! | anything else              | nothing                       |

use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::protocol::{InboundEvent, OutboundRequest};
use crate::session::LocalUser;
use crate::sync_status::{describe_conflict, SyncState};

/// Reply delays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Join/leave, comment and conflict acknowledgements.
    pub ack_delay: Duration,
    /// Cursor and typing echoes.
    pub echo_delay: Duration,
    /// Sync completion.
    pub sync_delay: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ack_delay: Duration::from_millis(100),
            echo_delay: Duration::from_millis(30),
            sync_delay: Duration::from_millis(200),
        }
    }
}

/// A synthetic event and when to deliver it.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedReply {
    pub delay: Duration,
    pub event: InboundEvent,
}

/// Maps outbound requests to synthetic replies.
#[derive(Debug, Clone)]
pub struct SimulationEngine {
    config: SimulationConfig,
    user: LocalUser,
}

impl SimulationEngine {
    pub fn new(config: SimulationConfig, user: LocalUser) -> Self {
        Self { config, user }
    }

    /// Reply for `request`, or `None` for kinds the simulation does not know.
    pub fn handle(&self, request: &OutboundRequest) -> Option<SimulatedReply> {
        let ack = self.config.ack_delay;
        let (delay, event) = match request {
            OutboundRequest::JoinFile { resource_id, user_id }
            | OutboundRequest::JoinFolder { resource_id, user_id } => (
                ack,
                InboundEvent::UserJoined {
                    resource_id: resource_id.clone(),
                    user_id: user_id.clone(),
                    user_name: self.user.name.clone(),
                    avatar: self.user.avatar.clone(),
                    cursor: None,
                },
            ),
            OutboundRequest::LeaveFile { resource_id, user_id }
            | OutboundRequest::LeaveFolder { resource_id, user_id } => (
                ack,
                InboundEvent::UserLeft {
                    resource_id: resource_id.clone(),
                    user_id: user_id.clone(),
                    user_name: Some(self.user.name.clone()),
                },
            ),
            OutboundRequest::CursorUpdate { resource_id, user_id, position } => (
                self.config.echo_delay,
                InboundEvent::CursorMoved {
                    resource_id: resource_id.clone(),
                    user_id: user_id.clone(),
                    position: *position,
                },
            ),
            OutboundRequest::TypingUpdate { resource_id, user_id, is_typing, location } => (
                self.config.echo_delay,
                InboundEvent::UserTyping {
                    resource_id: resource_id.clone(),
                    user_id: user_id.clone(),
                    is_typing: *is_typing,
                    location: location.clone(),
                },
            ),
            OutboundRequest::AddComment { resource_id, comment, user_id } => (
                ack,
                InboundEvent::CommentAdded {
                    resource_id: resource_id.clone(),
                    user_id: user_id.clone(),
                    comment: stamp_comment(comment, &self.user),
                },
            ),
            OutboundRequest::RequestSync { file_id, .. }
            | OutboundRequest::ResolveConflict { file_id, .. } => (
                self.config.sync_delay,
                sync_status(file_id, SyncState::Synced, None),
            ),
            OutboundRequest::ReportConflict { file_id, data, .. } => (
                ack,
                sync_status(file_id, SyncState::Conflict, Some(describe_conflict(data))),
            ),
            OutboundRequest::Custom { kind, .. } => {
                log::debug!("Simulation ignores `{kind}`");
                return None;
            }
        };
        Some(SimulatedReply { delay, event })
    }
}

fn sync_status(file_id: &str, status: SyncState, conflict_reason: Option<String>) -> InboundEvent {
    InboundEvent::SyncStatus {
        file_id: file_id.to_string(),
        status,
        last_sync: Some(Utc::now()),
        conflict_reason,
        error_message: None,
        progress: (status == SyncState::Synced).then_some(100.0),
    }
}

/// Give a comment the fields a backend would assign.
fn stamp_comment(comment: &Value, author: &LocalUser) -> Value {
    let mut stamped = match comment {
        Value::Object(_) => comment.clone(),
        other => json!({ "text": other }),
    };
    if let Value::Object(fields) = &mut stamped {
        fields
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        fields
            .entry("author")
            .or_insert_with(|| Value::String(author.name.clone()));
        fields
            .entry("createdAt")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
    }
    stamped
}

/// Replies waiting for their delay to elapse.
///
/// Each reply runs as its own task; dropping the set or calling
/// [`PendingReplies::cancel_all`] aborts every outstanding timer.
#[derive(Debug, Default)]
pub struct PendingReplies {
    tasks: JoinSet<InboundEvent>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `reply`. Must be called inside a tokio runtime.
    pub fn schedule(&mut self, reply: SimulatedReply) {
        let SimulatedReply { delay, event } = reply;
        self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            event
        });
    }

    /// Next reply whose delay elapsed. Pending forever while empty.
    pub async fn next(&mut self) -> InboundEvent {
        loop {
            match self.tasks.join_next().await {
                Some(Ok(event)) => return event,
                Some(Err(e)) => log::debug!("Simulated reply task ended early: {e}"),
                None => std::future::pending::<()>().await,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn cancel_all(&mut self) {
        self.tasks.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::Vec2;

    fn engine() -> SimulationEngine {
        SimulationEngine::new(
            SimulationConfig::default(),
            LocalUser::new("u1", "User One").with_avatar("avatars/u1.png"),
        )
    }

    #[test]
    fn test_join_acknowledged_as_local_user() {
        let reply = engine()
            .handle(&OutboundRequest::JoinFile { resource_id: "file-42".into(), user_id: "u1".into() })
            .unwrap();

        assert_eq!(reply.delay, Duration::from_millis(100));
        assert_eq!(
            reply.event,
            InboundEvent::UserJoined {
                resource_id: "file-42".into(),
                user_id: "u1".into(),
                user_name: "User One".into(),
                avatar: Some("avatars/u1.png".into()),
                cursor: None,
            }
        );
    }

    #[test]
    fn test_folder_leave_acknowledged() {
        let reply = engine()
            .handle(&OutboundRequest::LeaveFolder { resource_id: "d1".into(), user_id: "u1".into() })
            .unwrap();
        assert!(matches!(reply.event, InboundEvent::UserLeft { ref resource_id, .. } if resource_id == "d1"));
    }

    #[test]
    fn test_cursor_echo_uses_echo_delay() {
        let reply = engine()
            .handle(&OutboundRequest::CursorUpdate {
                resource_id: "f".into(),
                user_id: "u1".into(),
                position: Vec2::new(4.0, 2.0),
            })
            .unwrap();
        assert_eq!(reply.delay, Duration::from_millis(30));
        assert!(matches!(reply.event, InboundEvent::CursorMoved { position, .. } if position == Vec2::new(4.0, 2.0)));
    }

    #[test]
    fn test_comment_gets_id_and_author() {
        let reply = engine()
            .handle(&OutboundRequest::AddComment {
                resource_id: "f".into(),
                comment: json!({"text": "looks good"}),
                user_id: "u1".into(),
            })
            .unwrap();

        match reply.event {
            InboundEvent::CommentAdded { comment, .. } => {
                assert_eq!(comment["text"], "looks good");
                assert!(comment["id"].as_str().is_some());
                assert_eq!(comment["author"], "User One");
                assert!(comment["createdAt"].as_str().is_some());
            }
            other => panic!("Expected CommentAdded, got {other:?}"),
        }
    }

    #[test]
    fn test_comment_keeps_existing_id() {
        let stamped = stamp_comment(&json!({"id": "c-1"}), &LocalUser::new("u", "U"));
        assert_eq!(stamped["id"], "c-1");
    }

    #[test]
    fn test_plain_comment_wrapped() {
        let stamped = stamp_comment(&json!("hello"), &LocalUser::new("u", "U"));
        assert_eq!(stamped["text"], "hello");
    }

    #[test]
    fn test_sync_requests_produce_one_status_each() {
        let engine = engine();
        let synced = engine
            .handle(&OutboundRequest::RequestSync { file_id: "F".into(), user_id: "u1".into() })
            .unwrap();
        assert_eq!(synced.delay, Duration::from_millis(200));
        assert!(matches!(
            synced.event,
            InboundEvent::SyncStatus { status: SyncState::Synced, progress: Some(p), .. } if p == 100.0
        ));

        let conflict = engine
            .handle(&OutboundRequest::ReportConflict {
                file_id: "F".into(),
                user_id: "u1".into(),
                data: json!({"reason": "two editors"}),
            })
            .unwrap();
        match conflict.event {
            InboundEvent::SyncStatus { status, conflict_reason, .. } => {
                assert_eq!(status, SyncState::Conflict);
                assert_eq!(conflict_reason.as_deref(), Some("two editors"));
            }
            other => panic!("Expected SyncStatus, got {other:?}"),
        }

        let resolved = engine
            .handle(&OutboundRequest::ResolveConflict {
                file_id: "F".into(),
                user_id: "u1".into(),
                resolution: json!("keep-mine"),
            })
            .unwrap();
        assert!(matches!(resolved.event, InboundEvent::SyncStatus { status: SyncState::Synced, .. }));
    }

    #[test]
    fn test_unknown_request_dropped() {
        let reply = engine().handle(&OutboundRequest::Custom {
            kind: "share_file".into(),
            user_id: "u1".into(),
            payload: json!({"with": "bob"}),
        });
        assert!(reply.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_replies_in_delay_order() {
        let mut pending = PendingReplies::new();
        pending.schedule(SimulatedReply {
            delay: Duration::from_millis(200),
            event: InboundEvent::SecurityAlert { message: "late".into() },
        });
        pending.schedule(SimulatedReply {
            delay: Duration::from_millis(10),
            event: InboundEvent::SecurityAlert { message: "early".into() },
        });
        assert_eq!(pending.len(), 2);

        assert_eq!(pending.next().await, InboundEvent::SecurityAlert { message: "early".into() });
        assert_eq!(pending.next().await, InboundEvent::SecurityAlert { message: "late".into() });
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_drops_pending() {
        let mut pending = PendingReplies::new();
        pending.schedule(SimulatedReply {
            delay: Duration::from_secs(1),
            event: InboundEvent::SecurityAlert { message: "never".into() },
        });
        pending.cancel_all();

        let next = tokio::time::timeout(Duration::from_secs(5), pending.next()).await;
        assert!(next.is_err());
    }
}
