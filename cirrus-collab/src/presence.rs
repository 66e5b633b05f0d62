//! Presence registry: who is active on which resource.
//!
//! ## Architecture
//!
//! ```text
//! user_joined / user_left / cursor_moved / user_typing
//!       │
//!       ▼
//! Dispatcher (first subscriber, driver task)
//!       │
//!       ▼
//! PresenceRegistry::apply_event()
//!       │
//!       ▼
//! PresenceRegistry::snapshot(resource)  ──► UI (cloned Vec)
//! ```
//!
//! Each resource maps to an ordered list of [`Collaborator`]s in join order.
//! A user appears at most once per resource. Cursor and typing updates only
//! touch existing members; an update for a user that already left is
//! dropped so out-of-order traffic cannot resurrect a membership.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::protocol::InboundEvent;

// ───────────────────────────────────────────────────────────────────
// Core types
// ───────────────────────────────────────────────────────────────────

/// 2D cursor position in resource (viewer) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Default for Vec2 {
    fn default() -> Self {
        Self::ZERO
    }
}

/// RGBA color for cursor rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl CursorColor {
    /// Create from RGBA components.
    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// CSS hex form (`#rrggbb`), alpha dropped.
    pub fn to_hex(&self) -> String {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", channel(self.r), channel(self.g), channel(self.b))
    }
}

impl Default for CursorColor {
    fn default() -> Self {
        Self { r: 0.26, g: 0.52, b: 0.96, a: 1.0 } // Default blue
    }
}

/// Stable, visually distinct cursor color for a user id.
///
/// Pure function of the id: FNV-1a hash → hue, fixed saturation and
/// lightness, then HSL → RGB.
pub fn color_for_user(user_id: &str) -> CursorColor {
    let hash = fnv1a(user_id.as_bytes());
    let hue = (hash % 360) as f32 / 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
    CursorColor { r, g, b, a: 1.0 }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

/// HSL to RGB conversion helper.
fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l); // Achromatic
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 { t += 1.0; }
    if t > 1.0 { t -= 1.0; }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// A collaborator's cursor on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorState {
    pub position: Vec2,
    pub color: CursorColor,
}

impl CursorState {
    pub fn for_user(user_id: &str, position: Vec2) -> Self {
        Self {
            position,
            color: color_for_user(user_id),
        }
    }
}

/// One user present on one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub user_id: String,
    pub user_name: String,
    pub avatar: Option<String>,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    pub cursor: Option<CursorState>,
    pub is_typing: bool,
    pub typing_location: Option<String>,
}

impl Collaborator {
    /// A freshly joined, online collaborator with no cursor.
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            avatar: None,
            online: true,
            last_seen: Utc::now(),
            cursor: None,
            is_typing: false,
            typing_location: None,
        }
    }

    pub fn with_avatar(mut self, avatar: Option<String>) -> Self {
        self.avatar = avatar;
        self
    }

    pub fn with_cursor(mut self, position: Option<Vec2>) -> Self {
        self.cursor = position.map(|p| CursorState::for_user(&self.user_id, p));
        self
    }
}

// ───────────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────────

/// Per-resource collaborator sets.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    resources: HashMap<String, Vec<Collaborator>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the collaborator for `resource`.
    ///
    /// A rejoin replaces the whole entry (last join wins, stale cursor
    /// included) but keeps the user's original position in the list.
    pub fn apply_join(&mut self, resource: &str, collaborator: Collaborator) {
        let members = self.resources.entry(resource.to_string()).or_default();
        match members.iter_mut().find(|c| c.user_id == collaborator.user_id) {
            Some(existing) => *existing = collaborator,
            None => members.push(collaborator),
        }
    }

    /// Remove a user from `resource`. Returns the removed entry.
    pub fn apply_leave(&mut self, resource: &str, user_id: &str) -> Option<Collaborator> {
        let members = self.resources.get_mut(resource)?;
        let index = members.iter().position(|c| c.user_id == user_id)?;
        let removed = members.remove(index);
        if members.is_empty() {
            self.resources.remove(resource);
        }
        Some(removed)
    }

    /// Move a member's cursor. Returns `false` (and changes nothing) when the
    /// user is not a member of `resource`.
    pub fn apply_cursor(&mut self, resource: &str, user_id: &str, position: Vec2) -> bool {
        match self.member_mut(resource, user_id) {
            Some(member) => {
                member.cursor = Some(CursorState::for_user(user_id, position));
                member.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Update a member's typing flag. Same membership rule as cursors.
    pub fn apply_typing(
        &mut self,
        resource: &str,
        user_id: &str,
        is_typing: bool,
        location: Option<String>,
    ) -> bool {
        match self.member_mut(resource, user_id) {
            Some(member) => {
                member.is_typing = is_typing;
                member.typing_location = if is_typing { location } else { None };
                member.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Apply a presence event. Non-presence events are ignored.
    pub fn apply_event(&mut self, event: &InboundEvent) {
        match event {
            InboundEvent::UserJoined { resource_id, user_id, user_name, avatar, cursor } => {
                let collaborator = Collaborator::new(user_id.clone(), user_name.clone())
                    .with_avatar(avatar.clone())
                    .with_cursor(*cursor);
                self.apply_join(resource_id, collaborator);
            }
            InboundEvent::UserLeft { resource_id, user_id, .. } => {
                if self.apply_leave(resource_id, user_id).is_none() {
                    log::debug!("Leave for non-member {user_id} on {resource_id} ignored");
                }
            }
            InboundEvent::CursorMoved { resource_id, user_id, position } => {
                if !self.apply_cursor(resource_id, user_id, *position) {
                    log::debug!("Cursor for non-member {user_id} on {resource_id} dropped");
                }
            }
            InboundEvent::UserTyping { resource_id, user_id, is_typing, location } => {
                self.apply_typing(resource_id, user_id, *is_typing, location.clone());
            }
            _ => {}
        }
    }

    /// Ordered copy of the collaborators on `resource` (empty when unknown).
    pub fn snapshot(&self, resource: &str) -> Vec<Collaborator> {
        self.resources.get(resource).cloned().unwrap_or_default()
    }

    /// Number of collaborators on `resource`.
    pub fn member_count(&self, resource: &str) -> usize {
        self.resources.get(resource).map_or(0, Vec::len)
    }

    /// Resources with at least one collaborator, sorted.
    pub fn resources(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.resources.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Mark everyone but `local_user_id` offline after the real link drops.
    /// Nobody can announce their departure until a new link is up. Returns
    /// how many entries changed.
    pub fn mark_remote_offline(&mut self, local_user_id: &str) -> usize {
        let mut changed = 0;
        for member in self.resources.values_mut().flatten() {
            if member.user_id != local_user_id && member.online {
                member.online = false;
                member.is_typing = false;
                member.typing_location = None;
                changed += 1;
            }
        }
        changed
    }

    /// Drop collaborators still offline, and any resource left empty.
    /// Returns how many entries were removed.
    pub fn prune_offline(&mut self) -> usize {
        let mut removed = 0;
        self.resources.retain(|_, members| {
            let before = members.len();
            members.retain(|c| c.online);
            removed += before - members.len();
            !members.is_empty()
        });
        removed
    }

    /// Drop every membership.
    pub fn clear(&mut self) {
        self.resources.clear();
    }

    fn member_mut(&mut self, resource: &str, user_id: &str) -> Option<&mut Collaborator> {
        self.resources
            .get_mut(resource)?
            .iter_mut()
            .find(|c| c.user_id == user_id)
    }
}

// ===================================================================
// Tests
// ===================================================================
