//! Port traits for storage and notification. Implemented by
//! `tor_postgres` and by [`crate::memory`].

use async_trait::async_trait;
use serde::Serialize;

use crate::document::{NewTorDocument, Precondition, TorContent, TorDocument};
use crate::engine::TransitionCommit;
use crate::error::TorError;
use crate::history::{ApprovalHistoryEntry, NewHistoryEntry};
use crate::org::{OrganizationalUnit, Position, UserRecord};
use crate::types::{PositionId, TorId, UnitId, UserId};
use crate::workflow::WorkflowRecord;

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn load_user(&self, id: UserId) -> Result<Option<UserRecord>, TorError>;
    /// Position with its capability tags resolved.
    async fn load_position(&self, id: PositionId) -> Result<Option<Position>, TorError>;
    async fn load_unit(&self, id: UnitId) -> Result<Option<OrganizationalUnit>, TorError>;
    /// Lowest-id active user holding the position.
    async fn first_active_holder(
        &self,
        position: PositionId,
    ) -> Result<Option<UserRecord>, TorError>;
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Raw workflow for the unit, active or not. Validation is the caller's job.
    async fn load_workflow_for_unit(
        &self,
        unit: UnitId,
    ) -> Result<Option<WorkflowRecord>, TorError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_document(&self, doc: NewTorDocument) -> Result<TorDocument, TorError>;

    async fn load_document(&self, id: TorId) -> Result<Option<TorDocument>, TorError>;

    /// Newest first. `None` lists every document.
    async fn list_by_creator(&self, creator: Option<UserId>) -> Result<Vec<TorDocument>, TorError>;

    /// Documents in a live approval stage whose current step is bound to `position`.
    async fn list_awaiting_position(
        &self,
        position: PositionId,
    ) -> Result<Vec<TorDocument>, TorError>;

    /// Replace content if the stored row still satisfies `expected`.
    /// Bumps the revision.
    async fn update_content(
        &self,
        id: TorId,
        expected: &Precondition,
        content: &TorContent,
    ) -> Result<TorDocument, TorError>;

    /// Apply the state change and append the history entry as one unit.
    ///
    /// Fails with `ConcurrentModification` when the stored state or revision
    /// differs from `expected`, and with `NotFound` when the document is gone.
    /// Neither the update nor the append is visible on failure.
    async fn commit_transition(
        &self,
        id: TorId,
        expected: &Precondition,
        commit: &TransitionCommit,
    ) -> Result<(TorDocument, ApprovalHistoryEntry), TorError>;
}

/// Append-only ledger. Entries are never updated.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Standalone append for audit entries that do not change state (export).
    async fn append(&self, entry: &NewHistoryEntry) -> Result<ApprovalHistoryEntry, TorError>;
    /// Insertion order.
    async fn list_for(&self, tor: TorId) -> Result<Vec<ApprovalHistoryEntry>, TorError>;
}

// ── Notifier ───────────────────────────────────────────────────

/// Outbound message. Recipients and links are resolved by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    AwaitingApproval {
        to: String,
        tor_id: TorId,
        number: String,
        title: String,
        step_label: String,
        submitted_by: String,
        link: String,
    },
    Approved {
        to: String,
        tor_id: TorId,
        number: String,
        title: String,
        step_label: String,
        is_final: bool,
        approved_by: String,
        link: String,
    },
    RevisionRequested {
        to: String,
        tor_id: TorId,
        number: String,
        title: String,
        note: String,
        requested_by: String,
        link: String,
    },
    Rejected {
        to: String,
        tor_id: TorId,
        number: String,
        title: String,
        note: String,
        rejected_by: String,
        link: String,
    },
}

impl Notification {
    pub fn recipient(&self) -> &str {
        match self {
            Self::AwaitingApproval { to, .. }
            | Self::Approved { to, .. }
            | Self::RevisionRequested { to, .. }
            | Self::Rejected { to, .. } => to,
        }
    }

    pub fn tor_id(&self) -> TorId {
        match self {
            Self::AwaitingApproval { tor_id, .. }
            | Self::Approved { tor_id, .. }
            | Self::RevisionRequested { tor_id, .. }
            | Self::Rejected { tor_id, .. } => *tor_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AwaitingApproval { .. } => "awaiting_approval",
            Self::Approved { .. } => "approved",
            Self::RevisionRequested { .. } => "revision_requested",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Fire-and-forget delivery. Implementations must not block the caller on
/// I/O and must swallow their own failures.
pub trait Notifier: Send + Sync {
    fn dispatch(&self, notification: Notification);
}

/// Drops everything. Used when notifications are disabled.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn dispatch(&self, _notification: Notification) {}
}
