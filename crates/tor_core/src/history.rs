//! Append-only approval ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::org::Actor;
use crate::types::{HistoryAction, HistoryEntryId, StatusStage, TorId, UserId};

/// An immutable fact about one transition. Actor name and position title are
/// snapshots taken at write time, not live references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalHistoryEntry {
    pub id: HistoryEntryId,
    pub tor_id: TorId,
    pub step_number: i32,
    pub action: HistoryAction,
    pub from_status_stage: StatusStage,
    pub to_status_stage: StatusStage,
    pub acted_by_user_id: UserId,
    pub acted_by_name_snapshot: String,
    pub acted_by_position_snapshot: String,
    pub note: Option<String>,
    pub acted_at: DateTime<Utc>,
}

/// Insert shape for [`ApprovalHistoryEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub tor_id: TorId,
    pub step_number: i32,
    pub action: HistoryAction,
    pub from_status_stage: StatusStage,
    pub to_status_stage: StatusStage,
    pub acted_by_user_id: UserId,
    pub acted_by_name_snapshot: String,
    pub acted_by_position_snapshot: String,
    pub note: Option<String>,
    pub acted_at: DateTime<Utc>,
}

impl NewHistoryEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn by(
        actor: &Actor,
        tor_id: TorId,
        step_number: i32,
        action: HistoryAction,
        from: StatusStage,
        to: StatusStage,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            tor_id,
            step_number,
            action,
            from_status_stage: from,
            to_status_stage: to,
            acted_by_user_id: actor.user_id,
            acted_by_name_snapshot: actor.name.clone(),
            acted_by_position_snapshot: actor.position_title().to_string(),
            note,
            acted_at: at,
        }
    }

    pub fn into_entry(self, id: HistoryEntryId) -> ApprovalHistoryEntry {
        ApprovalHistoryEntry {
            id,
            tor_id: self.tor_id,
            step_number: self.step_number,
            action: self.action,
            from_status_stage: self.from_status_stage,
            to_status_stage: self.to_status_stage,
            acted_by_user_id: self.acted_by_user_id,
            acted_by_name_snapshot: self.acted_by_name_snapshot,
            acted_by_position_snapshot: self.acted_by_position_snapshot,
            note: self.note,
            acted_at: self.acted_at,
        }
    }
}
