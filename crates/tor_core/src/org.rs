//! Organizational read models: units, positions, users, and the resolved actor.
//!
//! These are flattened projections. Nothing here holds back-references into
//! workflows or documents.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::principal::Session;
use crate::types::{PositionId, UnitId, UserId};

/// Department ("bidang") that owns positions and at most one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationalUnit {
    pub id: UnitId,
    pub code: String,
    pub name: String,
    pub is_active: bool,
}

/// A seat in the organization. `unit_id = None` means a global position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub unit_id: Option<UnitId>,
    #[serde(default)]
    pub level_order: i32,
    pub is_active: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Position {
    pub fn is_global(&self) -> bool {
        self.unit_id.is_none()
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c == tag)
    }

    /// Global positions are scoped to every unit.
    pub fn is_scoped_to(&self, unit: UnitId) -> bool {
        self.unit_id.map_or(true, |u| u == unit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
    pub position_id: Option<PositionId>,
    pub is_active: bool,
    #[serde(default)]
    pub is_super_admin: bool,
}

/// The acting user for one request, with position and tags resolved.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: UserId,
    pub name: String,
    pub email: Option<String>,
    pub position: Option<Position>,
    pub is_override_authority: bool,
}

impl Actor {
    /// Combine a validated session with the directory records it points at.
    /// The stored user record wins over stale token claims.
    pub fn resolve(session: &Session, user: &UserRecord, position: Option<Position>) -> Self {
        if session.is_override_authority != user.is_super_admin
            || session.position_id != user.position_id
        {
            debug!(user_id = user.id.0, "session claims differ from directory record");
        }
        Self {
            user_id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            position: position.filter(|p| p.is_active),
            is_override_authority: user.is_super_admin,
        }
    }

    pub fn position_id(&self) -> Option<PositionId> {
        self.position.as_ref().map(|p| p.id)
    }

    /// Title captured into history snapshots.
    pub fn position_title(&self) -> &str {
        self.position
            .as_ref()
            .map(|p| p.name.as_str())
            .unwrap_or("Unknown")
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.position
            .as_ref()
            .is_some_and(|p| p.has_capability(tag))
    }
}
