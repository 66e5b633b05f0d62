//! Event vocabulary and JSON wire codec for the collaboration channel.
//!
//! Every frame is a JSON object tagged by `type`, with camelCase fields:
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────┐
//! │ "type": "<kind>"     │ kind-specific fields (resourceId, …)     │
//! └──────────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! Inbound frames decode into [`InboundEvent`], outbound requests encode from
//! [`OutboundRequest`]. Real and simulated traffic share the same shapes, so
//! consumers never need to know which side produced an event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::presence::Vec2;
use crate::sync_status::SyncState;

/// Whether events originate from a real backend or the local simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    Real,
    Simulated,
}

impl ConnectionMode {
    pub fn is_simulated(self) -> bool {
        matches!(self, ConnectionMode::Simulated)
    }
}

/// Fieldless discriminant of [`InboundEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Connect,
    Disconnect,
    ConnectionFailed,
    UserJoined,
    UserLeft,
    CursorMoved,
    UserTyping,
    CommentAdded,
    PermissionChanged,
    SyncStatus,
    ConflictDetected,
    FileUpdated,
    FileShared,
    SecurityAlert,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 14] = [
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::ConnectionFailed,
        EventKind::UserJoined,
        EventKind::UserLeft,
        EventKind::CursorMoved,
        EventKind::UserTyping,
        EventKind::CommentAdded,
        EventKind::PermissionChanged,
        EventKind::SyncStatus,
        EventKind::ConflictDetected,
        EventKind::FileUpdated,
        EventKind::FileShared,
        EventKind::SecurityAlert,
    ];

    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::ConnectionFailed => "connection_failed",
            EventKind::UserJoined => "user_joined",
            EventKind::UserLeft => "user_left",
            EventKind::CursorMoved => "cursor_moved",
            EventKind::UserTyping => "user_typing",
            EventKind::CommentAdded => "comment_added",
            EventKind::PermissionChanged => "permission_changed",
            EventKind::SyncStatus => "sync_status",
            EventKind::ConflictDetected => "conflict_detected",
            EventKind::FileUpdated => "file_updated",
            EventKind::FileShared => "file_shared",
            EventKind::SecurityAlert => "security_alert",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events delivered to the application, from the backend or the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InboundEvent {
    Connect {
        mode: ConnectionMode,
    },
    Disconnect {
        mode: ConnectionMode,
    },
    ConnectionFailed {
        mode: ConnectionMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    UserJoined {
        resource_id: String,
        user_id: String,
        user_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<Vec2>,
    },
    UserLeft {
        resource_id: String,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },
    CursorMoved {
        resource_id: String,
        user_id: String,
        position: Vec2,
    },
    UserTyping {
        resource_id: String,
        user_id: String,
        is_typing: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
    CommentAdded {
        resource_id: String,
        user_id: String,
        comment: Value,
    },
    PermissionChanged {
        resource_id: String,
        subject_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permission: Option<String>,
    },
    SyncStatus {
        file_id: String,
        status: SyncState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_sync: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conflict_reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f32>,
    },
    ConflictDetected {
        file_id: String,
        details: Value,
    },
    FileUpdated {
        file_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default)]
        details: Value,
    },
    FileShared {
        resource_id: String,
        subject_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permission: Option<String>,
    },
    SecurityAlert {
        message: String,
    },
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::Connect { .. } => EventKind::Connect,
            InboundEvent::Disconnect { .. } => EventKind::Disconnect,
            InboundEvent::ConnectionFailed { .. } => EventKind::ConnectionFailed,
            InboundEvent::UserJoined { .. } => EventKind::UserJoined,
            InboundEvent::UserLeft { .. } => EventKind::UserLeft,
            InboundEvent::CursorMoved { .. } => EventKind::CursorMoved,
            InboundEvent::UserTyping { .. } => EventKind::UserTyping,
            InboundEvent::CommentAdded { .. } => EventKind::CommentAdded,
            InboundEvent::PermissionChanged { .. } => EventKind::PermissionChanged,
            InboundEvent::SyncStatus { .. } => EventKind::SyncStatus,
            InboundEvent::ConflictDetected { .. } => EventKind::ConflictDetected,
            InboundEvent::FileUpdated { .. } => EventKind::FileUpdated,
            InboundEvent::FileShared { .. } => EventKind::FileShared,
            InboundEvent::SecurityAlert { .. } => EventKind::SecurityAlert,
        }
    }

    /// Resource or file the event is scoped to, if any.
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            InboundEvent::UserJoined { resource_id, .. }
            | InboundEvent::UserLeft { resource_id, .. }
            | InboundEvent::CursorMoved { resource_id, .. }
            | InboundEvent::UserTyping { resource_id, .. }
            | InboundEvent::CommentAdded { resource_id, .. }
            | InboundEvent::PermissionChanged { resource_id, .. }
            | InboundEvent::FileShared { resource_id, .. } => Some(resource_id),
            InboundEvent::SyncStatus { file_id, .. }
            | InboundEvent::ConflictDetected { file_id, .. }
            | InboundEvent::FileUpdated { file_id, .. } => Some(file_id),
            _ => None,
        }
    }

    /// Decode an inbound text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }

    /// Encode as a text frame (used by test backends and the simulation log).
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Malformed)
    }
}

/// Requests sent from this client to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundRequest {
    JoinFile {
        resource_id: String,
        user_id: String,
    },
    LeaveFile {
        resource_id: String,
        user_id: String,
    },
    JoinFolder {
        resource_id: String,
        user_id: String,
    },
    LeaveFolder {
        resource_id: String,
        user_id: String,
    },
    CursorUpdate {
        resource_id: String,
        user_id: String,
        position: Vec2,
    },
    TypingUpdate {
        resource_id: String,
        user_id: String,
        is_typing: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
    AddComment {
        resource_id: String,
        comment: Value,
        user_id: String,
    },
    RequestSync {
        file_id: String,
        user_id: String,
    },
    ReportConflict {
        file_id: String,
        user_id: String,
        data: Value,
    },
    ResolveConflict {
        file_id: String,
        user_id: String,
        resolution: Value,
    },
    /// Any request kind outside the fixed vocabulary.
    Custom {
        kind: String,
        user_id: String,
        payload: Value,
    },
}

impl OutboundRequest {
    /// Wire name of the request.
    pub fn kind(&self) -> &str {
        match self {
            OutboundRequest::JoinFile { .. } => "join_file",
            OutboundRequest::LeaveFile { .. } => "leave_file",
            OutboundRequest::JoinFolder { .. } => "join_folder",
            OutboundRequest::LeaveFolder { .. } => "leave_folder",
            OutboundRequest::CursorUpdate { .. } => "cursor_update",
            OutboundRequest::TypingUpdate { .. } => "typing_update",
            OutboundRequest::AddComment { .. } => "add_comment",
            OutboundRequest::RequestSync { .. } => "request_sync",
            OutboundRequest::ReportConflict { .. } => "report_conflict",
            OutboundRequest::ResolveConflict { .. } => "resolve_conflict",
            OutboundRequest::Custom { kind, .. } => kind,
        }
    }

    /// Presence traffic that is worthless once stale and is never queued.
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            OutboundRequest::CursorUpdate { .. } | OutboundRequest::TypingUpdate { .. }
        )
    }

    /// Join/leave requests, which are carried by membership replay rather
    /// than the offline queue.
    pub fn is_membership(&self) -> bool {
        matches!(
            self,
            OutboundRequest::JoinFile { .. }
                | OutboundRequest::LeaveFile { .. }
                | OutboundRequest::JoinFolder { .. }
                | OutboundRequest::LeaveFolder { .. }
        )
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Malformed)
    }

    /// Parse a JSON text frame (used by backends and tests).
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }
}

/// Errors raised while decoding or encoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported frame type: {0}")]
    UnsupportedFrame(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_joined_wire_shape() {
        let event = InboundEvent::UserJoined {
            resource_id: "f1".into(),
            user_id: "u9".into(),
            user_name: "Nine".into(),
            avatar: None,
            cursor: Some(Vec2::new(3.0, 4.0)),
        };

        let value: Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "user_joined");
        assert_eq!(value["resourceId"], "f1");
        assert_eq!(value["userId"], "u9");
        assert_eq!(value["userName"], "Nine");
        assert_eq!(value["cursor"]["x"], 3.0);
        assert!(value.get("avatar").is_none());
    }

    #[test]
    fn test_decode_sync_status_with_optional_fields() {
        let text = r#"{"type":"sync_status","fileId":"f1","status":"error","errorMessage":"disk full"}"#;
        let event = InboundEvent::decode(text).unwrap();

        match event {
            InboundEvent::SyncStatus { file_id, status, error_message, conflict_reason, progress, last_sync } => {
                assert_eq!(file_id, "f1");
                assert_eq!(status, SyncState::Error);
                assert_eq!(error_message.as_deref(), Some("disk full"));
                assert!(conflict_reason.is_none());
                assert!(progress.is_none());
                assert!(last_sync.is_none());
            }
            other => panic!("Expected SyncStatus, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_connect_mode() {
        let event = InboundEvent::decode(r#"{"type":"connect","mode":"simulated"}"#).unwrap();
        assert_eq!(event, InboundEvent::Connect { mode: ConnectionMode::Simulated });
        assert_eq!(event.kind(), EventKind::Connect);
    }

    #[test]
    fn test_decode_unknown_kind_is_error() {
        let err = InboundEvent::decode(r#"{"type":"file_exploded","fileId":"f1"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_decode_missing_required_field_is_error() {
        // cursor_moved without a position
        assert!(InboundEvent::decode(r#"{"type":"cursor_moved","resourceId":"f1","userId":"u1"}"#).is_err());
    }

    #[test]
    fn test_decode_garbage() {
        assert!(InboundEvent::decode("not json").is_err());
    }

    #[test]
    fn test_outbound_wire_names() {
        let req = OutboundRequest::AddComment {
            resource_id: "f1".into(),
            comment: json!({"text": "hi"}),
            user_id: "u1".into(),
        };
        let value: Value = serde_json::from_str(&req.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "add_comment");
        assert_eq!(value["resourceId"], "f1");
        assert_eq!(value["comment"]["text"], "hi");
        assert_eq!(req.kind(), "add_comment");
    }

    #[test]
    fn test_custom_request_kind() {
        let req = OutboundRequest::Custom {
            kind: "share_file".into(),
            user_id: "u1".into(),
            payload: Value::Null,
        };
        assert_eq!(req.kind(), "share_file");
        assert!(!req.is_membership());
        assert!(!req.is_ephemeral());
    }

    #[test]
    fn test_request_classification() {
        let join = OutboundRequest::JoinFolder { resource_id: "d".into(), user_id: "u".into() };
        let cursor = OutboundRequest::CursorUpdate {
            resource_id: "f".into(),
            user_id: "u".into(),
            position: Vec2::ZERO,
        };
        let sync = OutboundRequest::RequestSync { file_id: "f".into(), user_id: "u".into() };

        assert!(join.is_membership());
        assert!(cursor.is_ephemeral());
        assert!(!sync.is_membership() && !sync.is_ephemeral());
    }

    #[test]
    fn test_resource_id_accessor() {
        let event = InboundEvent::ConflictDetected { file_id: "f7".into(), details: json!({}) };
        assert_eq!(event.resource_id(), Some("f7"));

        let alert = InboundEvent::SecurityAlert { message: "new login".into() };
        assert_eq!(alert.resource_id(), None);
    }

    #[test]
    fn test_event_kind_names_match_wire_tags() {
        let samples = [
            InboundEvent::Connect { mode: ConnectionMode::Real },
            InboundEvent::SecurityAlert { message: "x".into() },
            InboundEvent::FileShared {
                resource_id: "f".into(),
                subject_name: "Bob".into(),
                permission: None,
            },
        ];
        for event in samples {
            let value: Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
            assert_eq!(value["type"], event.kind().as_str());
        }
    }
}
