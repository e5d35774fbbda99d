//! Typed request/response contracts for the TOR API.
//! Validated here, before anything reaches the engine.

use serde::{Deserialize, Serialize};

use crate::document::{DocumentState, TorContent, TorDocument};
use crate::engine::AvailableAction;
use crate::error::TorError;
use crate::history::ApprovalHistoryEntry;
use crate::types::{PositionId, StatusStage, TorId, UnitId, UserId};

const MAX_TITLE_LEN: usize = 500;
const MAX_NOTE_LEN: usize = 4000;

// ── Requests ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTorRequest {
    /// Defaults to the actor's own unit.
    #[serde(default)]
    pub unit_id: Option<UnitId>,
    #[serde(flatten)]
    pub content: TorContent,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTorRequest {
    #[serde(flatten)]
    pub content: TorContent,
}

/// Body of revise and reject.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoteRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListView {
    #[default]
    Mine,
    Pending,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTorsQuery {
    #[serde(default)]
    pub view: ListView,
}

/// Length limits on free-text content.
pub fn validate_content(content: &TorContent) -> Result<(), TorError> {
    if content.title.chars().count() > MAX_TITLE_LEN {
        return Err(TorError::invalid_field(
            "title",
            format!("title exceeds {MAX_TITLE_LEN} characters"),
        ));
    }
    if !(content.details.is_null() || content.details.is_object()) {
        return Err(TorError::invalid_field(
            "details",
            "details must be a JSON object",
        ));
    }
    Ok(())
}

pub fn validate_note_len(note: Option<&str>) -> Result<(), TorError> {
    match note {
        Some(n) if n.chars().count() > MAX_NOTE_LEN => Err(TorError::invalid_field(
            "note",
            format!("note exceeds {MAX_NOTE_LEN} characters"),
        )),
        _ => Ok(()),
    }
}

// ── Responses ──────────────────────────────────────────────────

/// Summary returned by every transition endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    pub id: TorId,
    pub status_stage: StatusStage,
    pub current_step_number: i32,
    pub is_final_approved: bool,
    pub number: String,
}

impl From<&TorDocument> for TransitionResponse {
    fn from(doc: &TorDocument) -> Self {
        let DocumentState {
            status_stage,
            current_step_number,
            is_final_approved,
        } = doc.state;
        Self {
            id: doc.id,
            status_stage,
            current_step_number,
            is_final_approved,
            number: doc.number.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TorDetail {
    #[serde(flatten)]
    pub document: TorDocument,
    pub history: Vec<ApprovalHistoryEntry>,
    pub available_actions: Vec<AvailableAction>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepView {
    pub step_number: i32,
    pub label: String,
    pub status_stage: StatusStage,
    pub position_id: PositionId,
    pub position_name: Option<String>,
    pub holder_user_id: Option<UserId>,
    pub holder_name: Option<String>,
    pub can_revise: bool,
    pub is_last_step: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowView {
    pub unit_id: UnitId,
    pub unit_code: String,
    pub name: String,
    pub steps: Vec<WorkflowStepView>,
}
