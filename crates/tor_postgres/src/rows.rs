//! Row structs and their conversions into core types.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use tor_core::document::{DocumentState, TorContent, TorDocument};
use tor_core::history::ApprovalHistoryEntry;
use tor_core::org::{OrganizationalUnit, Position, UserRecord};
use tor_core::types::{
    HistoryAction, HistoryEntryId, PositionId, StatusStage, TorId, UnitId, UserId,
};
use tor_core::workflow::WorkflowStep;

fn stage(s: &str) -> Result<StatusStage, String> {
    StatusStage::parse(s).ok_or_else(|| format!("unknown status_stage '{s}'"))
}

#[derive(Debug, FromRow)]
pub(crate) struct UnitRow {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub is_active: bool,
}

impl From<UnitRow> for OrganizationalUnit {
    fn from(r: UnitRow) -> Self {
        Self {
            id: UnitId(r.id),
            code: r.code,
            name: r.name,
            is_active: r.is_active,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct PositionRow {
    pub id: i64,
    pub name: String,
    pub code: Option<String>,
    pub unit_id: Option<i64>,
    pub level_order: i32,
    pub is_active: bool,
    pub capabilities: Vec<String>,
}

impl From<PositionRow> for Position {
    fn from(r: PositionRow) -> Self {
        Self {
            id: PositionId(r.id),
            name: r.name,
            code: r.code,
            unit_id: r.unit_id.map(UnitId),
            level_order: r.level_order,
            is_active: r.is_active,
            capabilities: r.capabilities,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct UserRow {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub position_id: Option<i64>,
    pub is_active: bool,
    pub is_super_admin: bool,
}

impl From<UserRow> for UserRecord {
    fn from(r: UserRow) -> Self {
        Self {
            id: UserId(r.id),
            name: r.name,
            email: r.email,
            position_id: r.position_id.map(PositionId),
            is_active: r.is_active,
            is_super_admin: r.is_super_admin,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct WorkflowRow {
    pub id: i64,
    pub unit_id: i64,
    pub name: String,
    pub is_active: bool,
}

#[derive(Debug, FromRow)]
pub(crate) struct StepRow {
    pub step_number: i32,
    pub label: String,
    pub position_id: i64,
    pub status_stage: String,
    pub can_revise: bool,
    pub is_last_step: bool,
}

impl TryFrom<StepRow> for WorkflowStep {
    type Error = String;

    fn try_from(r: StepRow) -> Result<Self, Self::Error> {
        Ok(Self {
            step_number: r.step_number,
            label: r.label,
            position_id: PositionId(r.position_id),
            status_stage: stage(&r.status_stage)?,
            can_revise: r.can_revise,
            is_last_step: r.is_last_step,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct TorRow {
    pub id: i64,
    pub number: String,
    pub title: String,
    pub description: Option<String>,
    pub introduction: Option<String>,
    pub background: Option<String>,
    pub objective: Option<String>,
    pub scope: Option<String>,
    pub details: serde_json::Value,
    pub unit_id: i64,
    pub creator_user_id: i64,
    pub status_stage: String,
    pub current_step_number: i32,
    pub is_final_approved: bool,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TorRow> for TorDocument {
    type Error = String;

    fn try_from(r: TorRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: TorId(r.id),
            number: r.number,
            content: TorContent {
                title: r.title,
                description: r.description,
                introduction: r.introduction,
                background: r.background,
                objective: r.objective,
                scope: r.scope,
                details: r.details,
            },
            unit_id: UnitId(r.unit_id),
            creator_user_id: UserId(r.creator_user_id),
            state: DocumentState {
                status_stage: stage(&r.status_stage)?,
                current_step_number: r.current_step_number,
                is_final_approved: r.is_final_approved,
            },
            revision: r.revision,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct HistoryRow {
    pub id: i64,
    pub tor_id: i64,
    pub step_number: i32,
    pub action: String,
    pub from_status_stage: String,
    pub to_status_stage: String,
    pub acted_by_user_id: i64,
    pub acted_by_name_snapshot: String,
    pub acted_by_position_snapshot: String,
    pub note: Option<String>,
    pub acted_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for ApprovalHistoryEntry {
    type Error = String;

    fn try_from(r: HistoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: HistoryEntryId(r.id),
            tor_id: TorId(r.tor_id),
            step_number: r.step_number,
            action: HistoryAction::parse(&r.action)
                .ok_or_else(|| format!("unknown history action '{}'", r.action))?,
            from_status_stage: stage(&r.from_status_stage)?,
            to_status_stage: stage(&r.to_status_stage)?,
            acted_by_user_id: UserId(r.acted_by_user_id),
            acted_by_name_snapshot: r.acted_by_name_snapshot,
            acted_by_position_snapshot: r.acted_by_position_snapshot,
            note: r.note,
            acted_at: r.acted_at,
        })
    }
}
