//! The approval state machine.
//!
//! Pure functions over a document, its unit's workflow, and the acting user.
//! Each `plan_*` either fails without side effects or yields a
//! [`TransitionPlan`] describing the next state and the history fact to record.
//! Persisting a plan is the caller's job.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::document::{numbering, DocumentState, TorDocument};
use crate::error::TorError;
use crate::history::NewHistoryEntry;
use crate::org::Actor;
use crate::policy;
use crate::types::{HistoryAction, StatusStage};
use crate::workflow::{WorkflowDefinition, WorkflowStep};

const NOTE_SUBMITTED: &str = "ToR submitted for approval";
const NOTE_RESUBMITTED: &str = "ToR re-submitted after revision";
const NOTE_FINAL: &str = "Final approval granted";
const NOTE_ADVANCED: &str = "Approved, proceeding to next step";

/// Outcome of a successful transition decision.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub action: HistoryAction,
    /// Step number written to history: 0 for submit, the acted step otherwise.
    pub history_step: i32,
    pub from: DocumentState,
    pub to: DocumentState,
    /// Replacement document number, set on submit.
    pub number: Option<String>,
    pub note: Option<String>,
    /// Step the actor acted on. `None` for submit.
    pub acted_step: Option<WorkflowStep>,
    /// Step now awaiting a decision, if the chain continues.
    pub awaiting_step: Option<WorkflowStep>,
}

/// What the store must apply atomically: guarded state update plus one
/// history append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionCommit {
    pub next: DocumentState,
    pub number: Option<String>,
    pub entry: NewHistoryEntry,
}

impl TransitionPlan {
    pub fn is_final(&self) -> bool {
        self.to.is_final_approved
    }

    pub fn commit(&self, actor: &Actor, doc: &TorDocument, at: DateTime<Utc>) -> TransitionCommit {
        TransitionCommit {
            next: self.to,
            number: self.number.clone(),
            entry: NewHistoryEntry::by(
                actor,
                doc.id,
                self.history_step,
                self.action,
                self.from.status_stage,
                self.to.status_stage,
                self.note.clone(),
                at,
            ),
        }
    }
}

/// Trimmed, non-empty note or `MissingNote`.
pub fn require_note(note: Option<&str>, action: HistoryAction) -> Result<String, TorError> {
    match note.map(str::trim) {
        Some(n) if !n.is_empty() => Ok(n.to_string()),
        _ => Err(TorError::MissingNote(action.as_str().to_lowercase())),
    }
}

// ── Submit ─────────────────────────────────────────────────────

/// Checks that need no workflow: creator, stage, required fields.
pub fn precheck_submit(actor: &Actor, doc: &TorDocument) -> Result<(), TorError> {
    policy::require_submit(actor, doc)?;
    if !doc.state.status_stage.is_submittable() {
        return Err(TorError::NotSubmittable(doc.state.status_stage));
    }
    let missing = doc.content.missing_required_fields();
    if !missing.is_empty() {
        return Err(TorError::MissingRequiredFields(missing));
    }
    Ok(())
}

pub fn plan_submit(
    actor: &Actor,
    doc: &TorDocument,
    workflow: &WorkflowDefinition,
) -> Result<TransitionPlan, TorError> {
    precheck_submit(actor, doc)?;
    let first = workflow.first_step();
    let note = if doc.state.status_stage == StatusStage::Revise {
        NOTE_RESUBMITTED
    } else {
        NOTE_SUBMITTED
    };
    Ok(TransitionPlan {
        action: HistoryAction::Submit,
        history_step: 0,
        from: doc.state,
        to: DocumentState {
            status_stage: first.status_stage,
            current_step_number: first.step_number,
            is_final_approved: false,
        },
        number: Some(numbering::generate_tor_number(
            &doc.content.title,
            doc.created_at,
        )),
        note: Some(note.to_string()),
        acted_step: None,
        awaiting_step: Some(first.clone()),
    })
}

// ── Approve / Revise / Reject ──────────────────────────────────

/// Stage and finality checks shared by every in-chain action.
pub fn precheck_in_approval(doc: &TorDocument) -> Result<(), TorError> {
    if !doc.state.status_stage.is_approval() {
        return Err(TorError::NotInApproval(doc.state.status_stage));
    }
    if doc.state.is_final_approved {
        return Err(TorError::AlreadyFinalApproved);
    }
    Ok(())
}

fn authorized_step<'w>(
    actor: &Actor,
    doc: &TorDocument,
    workflow: &'w WorkflowDefinition,
) -> Result<&'w WorkflowStep, TorError> {
    precheck_in_approval(doc)?;
    let step = workflow.step_at(doc.state.current_step_number)?;
    policy::require_act(actor, step)?;
    Ok(step)
}

pub fn plan_approve(
    actor: &Actor,
    doc: &TorDocument,
    workflow: &WorkflowDefinition,
) -> Result<TransitionPlan, TorError> {
    let step = authorized_step(actor, doc, workflow)?;

    let (to, awaiting, note) = if step.is_last_step {
        let to = DocumentState {
            is_final_approved: true,
            ..doc.state
        };
        (to, None, NOTE_FINAL)
    } else {
        let next = workflow
            .next_step_after(step.step_number)
            .ok_or(TorError::StepNotFound(step.step_number + 1))?;
        let to = DocumentState {
            status_stage: next.status_stage,
            current_step_number: next.step_number,
            is_final_approved: false,
        };
        (to, Some(next.clone()), NOTE_ADVANCED)
    };

    Ok(TransitionPlan {
        action: HistoryAction::Approve,
        history_step: step.step_number,
        from: doc.state,
        to,
        number: None,
        note: Some(note.to_string()),
        acted_step: Some(step.clone()),
        awaiting_step: awaiting,
    })
}

pub fn plan_revise(
    actor: &Actor,
    doc: &TorDocument,
    workflow: &WorkflowDefinition,
    note: Option<&str>,
) -> Result<TransitionPlan, TorError> {
    let note = require_note(note, HistoryAction::Revise)?;
    let step = authorized_step(actor, doc, workflow)?;
    if !step.can_revise && !actor.is_override_authority {
        return Err(TorError::Forbidden(format!(
            "step {} ({}) does not allow revision",
            step.step_number, step.label
        )));
    }
    Ok(send_back(HistoryAction::Revise, doc, step, note))
}

pub fn plan_reject(
    actor: &Actor,
    doc: &TorDocument,
    workflow: &WorkflowDefinition,
    note: Option<&str>,
) -> Result<TransitionPlan, TorError> {
    let note = require_note(note, HistoryAction::Reject)?;
    let step = authorized_step(actor, doc, workflow)?;
    Ok(send_back(HistoryAction::Reject, doc, step, note))
}

/// Revise and reject both land in REVISE at step 0. Only the history tag differs.
fn send_back(
    action: HistoryAction,
    doc: &TorDocument,
    step: &WorkflowStep,
    note: String,
) -> TransitionPlan {
    TransitionPlan {
        action,
        history_step: step.step_number,
        from: doc.state,
        to: DocumentState {
            status_stage: StatusStage::Revise,
            current_step_number: 0,
            is_final_approved: false,
        },
        number: None,
        note: Some(note),
        acted_step: Some(step.clone()),
        awaiting_step: None,
    }
}

// ── Non-transition actions ─────────────────────────────────────

/// Content edits: DRAFT/REVISE for the creator, any non-final stage for override.
pub fn precheck_edit(actor: &Actor, doc: &TorDocument) -> Result<(), TorError> {
    policy::require_edit(actor, doc)?;
    if doc.state.is_final_approved {
        return Err(TorError::NotEditable(doc.state.status_stage));
    }
    if !doc.state.status_stage.is_submittable() && !actor.is_override_authority {
        return Err(TorError::NotEditable(doc.state.status_stage));
    }
    Ok(())
}

/// Actions the actor could take right now, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvailableAction {
    Edit,
    Submit,
    Approve,
    Revise,
    Reject,
    Export,
}

pub fn available_actions(
    actor: &Actor,
    doc: &TorDocument,
    workflow: Option<&WorkflowDefinition>,
) -> Vec<AvailableAction> {
    let mut actions = Vec::new();
    if precheck_edit(actor, doc).is_ok() {
        actions.push(AvailableAction::Edit);
    }
    if workflow.is_some() && precheck_submit(actor, doc).is_ok() {
        actions.push(AvailableAction::Submit);
    }
    if let Some(wf) = workflow {
        if let Ok(step) = authorized_step(actor, doc, wf) {
            actions.push(AvailableAction::Approve);
            if step.can_revise || actor.is_override_authority {
                actions.push(AvailableAction::Revise);
            }
            actions.push(AvailableAction::Reject);
        }
    }
    if policy::can_export(actor) && policy::can_view(actor, doc, workflow) {
        actions.push(AvailableAction::Export);
    }
    actions
}
