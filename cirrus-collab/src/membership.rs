//! Resources the local user has joined.
//!
//! The session records membership the moment the caller asks, whatever the
//! link is doing. The link driver reads the same set to re-announce every
//! joined resource after a reconnect or when falling back to simulation.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::protocol::OutboundRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    File,
    Folder,
}

/// A file or folder that can be joined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceKind,
    pub id: String,
}

impl Resource {
    pub fn file(id: impl Into<String>) -> Self {
        Self { kind: ResourceKind::File, id: id.into() }
    }

    pub fn folder(id: impl Into<String>) -> Self {
        Self { kind: ResourceKind::Folder, id: id.into() }
    }

    pub fn join_request(&self, user_id: &str) -> OutboundRequest {
        let resource_id = self.id.clone();
        let user_id = user_id.to_string();
        match self.kind {
            ResourceKind::File => OutboundRequest::JoinFile { resource_id, user_id },
            ResourceKind::Folder => OutboundRequest::JoinFolder { resource_id, user_id },
        }
    }

    pub fn leave_request(&self, user_id: &str) -> OutboundRequest {
        let resource_id = self.id.clone();
        let user_id = user_id.to_string();
        match self.kind {
            ResourceKind::File => OutboundRequest::LeaveFile { resource_id, user_id },
            ResourceKind::Folder => OutboundRequest::LeaveFolder { resource_id, user_id },
        }
    }

    /// The resource a join or leave request refers to.
    pub fn of_request(request: &OutboundRequest) -> Option<Self> {
        match request {
            OutboundRequest::JoinFile { resource_id, .. } | OutboundRequest::LeaveFile { resource_id, .. } => {
                Some(Self::file(resource_id.as_str()))
            }
            OutboundRequest::JoinFolder { resource_id, .. }
            | OutboundRequest::LeaveFolder { resource_id, .. } => Some(Self::folder(resource_id.as_str())),
            _ => None,
        }
    }
}

impl From<&str> for Resource {
    fn from(id: &str) -> Self {
        Self::file(id)
    }
}

impl From<String> for Resource {
    fn from(id: String) -> Self {
        Self::file(id)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ResourceKind::File => write!(f, "file:{}", self.id),
            ResourceKind::Folder => write!(f, "folder:{}", self.id),
        }
    }
}

/// A joined resource and when it was joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedResource {
    pub resource: Resource,
    pub joined_at: DateTime<Utc>,
}

/// Shared set of joined resources.
#[derive(Debug, Clone, Default)]
pub(crate) struct Membership {
    joined: Arc<Mutex<BTreeMap<Resource, DateTime<Utc>>>>,
}

impl Membership {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a join. Returns `false` if already joined.
    pub(crate) fn join(&self, resource: &Resource) -> bool {
        let mut joined = self.joined.lock();
        if joined.contains_key(resource) {
            return false;
        }
        joined.insert(resource.clone(), Utc::now());
        true
    }

    /// Record a leave. Returns `false` if not joined.
    pub(crate) fn leave(&self, resource: &Resource) -> bool {
        self.joined.lock().remove(resource).is_some()
    }

    pub(crate) fn contains(&self, resource: &Resource) -> bool {
        self.joined.lock().contains_key(resource)
    }

    /// Whether a file or folder with this id is joined.
    pub(crate) fn contains_id(&self, id: &str) -> bool {
        self.joined.lock().keys().any(|r| r.id == id)
    }

    /// Joined resources, oldest join first.
    pub(crate) fn joined(&self) -> Vec<JoinedResource> {
        let mut joined: Vec<JoinedResource> = self
            .joined
            .lock()
            .iter()
            .map(|(resource, at)| JoinedResource { resource: resource.clone(), joined_at: *at })
            .collect();
        joined.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.resource.cmp(&b.resource)));
        joined
    }

    pub(crate) fn resources(&self) -> Vec<Resource> {
        self.joined().into_iter().map(|j| j.resource).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_id_is_file() {
        assert_eq!(Resource::from("abc"), Resource::file("abc"));
        assert_eq!(Resource::from("abc".to_string()).kind, ResourceKind::File);
    }

    #[test]
    fn test_requests_follow_kind() {
        let folder = Resource::folder("d1");
        assert_eq!(
            folder.join_request("u1"),
            OutboundRequest::JoinFolder { resource_id: "d1".into(), user_id: "u1".into() }
        );
        assert_eq!(
            Resource::file("f1").leave_request("u1"),
            OutboundRequest::LeaveFile { resource_id: "f1".into(), user_id: "u1".into() }
        );
        assert_eq!(Resource::of_request(&folder.leave_request("u1")), Some(folder));
        assert_eq!(
            Resource::of_request(&OutboundRequest::RequestSync { file_id: "f".into(), user_id: "u".into() }),
            None
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Resource::file("a").to_string(), "file:a");
        assert_eq!(Resource::folder("b").to_string(), "folder:b");
    }

    #[test]
    fn test_join_is_idempotent() {
        let membership = Membership::new();
        assert!(membership.join(&Resource::file("a")));
        assert!(!membership.join(&Resource::file("a")));
        assert!(membership.join(&Resource::folder("a")));
        assert_eq!(membership.joined().len(), 2);
    }

    #[test]
    fn test_leave_unknown() {
        let membership = Membership::new();
        assert!(!membership.leave(&Resource::file("never")));
        membership.join(&Resource::file("a"));
        assert!(membership.leave(&Resource::file("a")));
        assert!(!membership.contains(&Resource::file("a")));
        assert!(membership.resources().is_empty());
    }

    #[test]
    fn test_contains_id_any_kind() {
        let membership = Membership::new();
        membership.join(&Resource::folder("shared"));
        assert!(membership.contains_id("shared"));
        assert!(!membership.contains_id("other"));
    }

    #[test]
    fn test_clones_share_state() {
        let membership = Membership::new();
        let view = membership.clone();
        membership.join(&Resource::file("a"));
        assert!(view.contains(&Resource::file("a")));
    }
}
