//! Authorization rules.
//!
//! Two independent families:
//! - step authority (`can_act`): exact position match, or override.
//! - capability tags (create/edit/export): never grant step authority.

use crate::document::TorDocument;
use crate::error::TorError;
use crate::org::Actor;
use crate::types::{capability, UnitId};
use crate::workflow::{WorkflowDefinition, WorkflowStep};

/// Exact position equality. No hierarchy, no tag matching.
pub fn can_act(actor: &Actor, step: &WorkflowStep) -> bool {
    actor.is_override_authority || actor.position_id() == Some(step.position_id)
}

pub fn can_create(actor: &Actor, unit: UnitId) -> bool {
    if actor.is_override_authority {
        return true;
    }
    actor.position.as_ref().is_some_and(|p| {
        p.has_capability(capability::CREATOR) && p.is_scoped_to(unit)
    })
}

pub fn can_edit(actor: &Actor, doc: &TorDocument) -> bool {
    actor.is_override_authority
        || (doc.creator_user_id == actor.user_id
            && (actor.has_capability(capability::CREATOR)
                || actor.has_capability(capability::EDITOR)))
}

pub fn can_submit(actor: &Actor, doc: &TorDocument) -> bool {
    actor.is_override_authority || doc.creator_user_id == actor.user_id
}

pub fn can_export(actor: &Actor) -> bool {
    actor.is_override_authority || actor.has_capability(capability::EXPORT)
}

/// `workflow` is `None` when the unit has no usable workflow; then only
/// the creator and override authority can see the document.
pub fn can_view(actor: &Actor, doc: &TorDocument, workflow: Option<&WorkflowDefinition>) -> bool {
    if actor.is_override_authority || doc.creator_user_id == actor.user_id {
        return true;
    }
    match (actor.position_id(), workflow) {
        (Some(pos), Some(wf)) => wf.binds_position(pos),
        _ => false,
    }
}

// ── Guards ─────────────────────────────────────────────────────

pub fn require_act(actor: &Actor, step: &WorkflowStep) -> Result<(), TorError> {
    if can_act(actor, step) {
        Ok(())
    } else {
        Err(TorError::Forbidden(format!(
            "step {} ({}) is assigned to another position",
            step.step_number, step.label
        )))
    }
}

pub fn require_create(actor: &Actor, unit: UnitId) -> Result<(), TorError> {
    if can_create(actor, unit) {
        Ok(())
    } else {
        Err(TorError::Forbidden(format!(
            "position cannot create documents for unit {unit}"
        )))
    }
}

pub fn require_edit(actor: &Actor, doc: &TorDocument) -> Result<(), TorError> {
    if can_edit(actor, doc) {
        Ok(())
    } else {
        Err(TorError::Forbidden("not allowed to edit this document".into()))
    }
}

pub fn require_submit(actor: &Actor, doc: &TorDocument) -> Result<(), TorError> {
    if can_submit(actor, doc) {
        Ok(())
    } else {
        Err(TorError::Forbidden(
            "only the creator can submit this document".into(),
        ))
    }
}

pub fn require_export(actor: &Actor) -> Result<(), TorError> {
    if can_export(actor) {
        Ok(())
    } else {
        Err(TorError::Forbidden("EXPORT capability required".into()))
    }
}

pub fn require_view(
    actor: &Actor,
    doc: &TorDocument,
    workflow: Option<&WorkflowDefinition>,
) -> Result<(), TorError> {
    if can_view(actor, doc, workflow) {
        Ok(())
    } else {
        Err(TorError::Forbidden("not allowed to view this document".into()))
    }
}
