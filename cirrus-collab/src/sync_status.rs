//! Last known synchronization outcome per file.
//!
//! Every `sync_status` event replaces the file's entry wholesale. A conflict
//! reason or error message therefore survives until the backend (or the
//! simulation) reports a newer status for the same file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::protocol::InboundEvent;

/// Synchronization state of a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Syncing,
    Synced,
    Conflict,
    Error,
    Paused,
}

/// Latest status of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub file_id: String,
    pub status: SyncState,
    pub last_sync: DateTime<Utc>,
    pub conflict_reason: Option<String>,
    pub error_message: Option<String>,
    pub progress: Option<f32>,
}

impl SyncStatus {
    pub fn new(file_id: impl Into<String>, status: SyncState) -> Self {
        Self {
            file_id: file_id.into(),
            status,
            last_sync: Utc::now(),
            conflict_reason: None,
            error_message: None,
            progress: None,
        }
    }

    pub fn is_conflicted(&self) -> bool {
        self.status == SyncState::Conflict
    }

    pub fn is_error(&self) -> bool {
        self.status == SyncState::Error
    }
}

/// One-line summary of an arbitrary conflict payload.
///
/// Prefers a `reason` or `message` string field, then a bare string, then
/// the compact JSON text.
pub fn describe_conflict(details: &Value) -> String {
    ["reason", "message"]
        .iter()
        .find_map(|key| details.get(key).and_then(Value::as_str))
        .or_else(|| details.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| details.to_string())
}

/// Per-file sync status table.
#[derive(Debug, Default)]
pub struct SyncStatusRegistry {
    files: HashMap<String, SyncStatus>,
}

impl SyncStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the status for `status.file_id`.
    pub fn apply_status(&mut self, status: SyncStatus) {
        self.files.insert(status.file_id.clone(), status);
    }

    /// Apply a sync-related event. Other events are ignored.
    pub fn apply_event(&mut self, event: &InboundEvent) {
        match event {
            InboundEvent::SyncStatus {
                file_id,
                status,
                last_sync,
                conflict_reason,
                error_message,
                progress,
            } => {
                self.apply_status(SyncStatus {
                    file_id: file_id.clone(),
                    status: *status,
                    last_sync: last_sync.unwrap_or_else(Utc::now),
                    conflict_reason: conflict_reason.clone(),
                    error_message: error_message.clone(),
                    progress: progress.map(|p| p.clamp(0.0, 100.0)),
                });
            }
            InboundEvent::ConflictDetected { file_id, details } => {
                let mut status = SyncStatus::new(file_id.clone(), SyncState::Conflict);
                status.conflict_reason = Some(describe_conflict(details));
                self.apply_status(status);
            }
            _ => {}
        }
    }

    pub fn snapshot(&self, file_id: &str) -> Option<SyncStatus> {
        self.files.get(file_id).cloned()
    }

    /// All statuses, sorted by file id.
    pub fn all(&self) -> Vec<SyncStatus> {
        let mut statuses: Vec<SyncStatus> = self.files.values().cloned().collect();
        statuses.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        statuses
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
