//! Per-unit approval chain: raw stored shape, validated definition, and
//! the catalog that loads it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::TorError;
use crate::ports::WorkflowStore;
use crate::types::{PositionId, StatusStage, UnitId, WorkflowId};

/// One step as stored. May violate invariants until validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_number: i32,
    pub label: String,
    pub position_id: PositionId,
    pub status_stage: StatusStage,
    #[serde(default)]
    pub can_revise: bool,
    #[serde(default)]
    pub is_last_step: bool,
}

/// Workflow row plus its steps, exactly as the store returns them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: WorkflowId,
    pub unit_id: UnitId,
    pub name: String,
    pub is_active: bool,
    pub steps: Vec<WorkflowStep>,
}

/// A validated, active workflow. Steps are sorted and numbered `1..=N`,
/// with exactly one last step at `N`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub unit_id: UnitId,
    pub name: String,
    steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    /// Validate a stored record. Never coerces: any violation is an error.
    pub fn from_record(record: WorkflowRecord) -> Result<Self, TorError> {
        let mut steps = record.steps;
        steps.sort_by_key(|s| s.step_number);
        validate_steps(&steps)?;
        Ok(Self {
            id: record.id,
            unit_id: record.unit_id,
            name: record.name,
            steps,
        })
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn first_step(&self) -> &WorkflowStep {
        // validated non-empty
        &self.steps[0]
    }

    pub fn last_step(&self) -> &WorkflowStep {
        &self.steps[self.steps.len() - 1]
    }

    pub fn step_at(&self, n: i32) -> Result<&WorkflowStep, TorError> {
        self.steps
            .iter()
            .find(|s| s.step_number == n)
            .ok_or(TorError::StepNotFound(n))
    }

    /// Step `n + 1`, or `None` when `n` is the last step.
    pub fn next_step_after(&self, n: i32) -> Option<&WorkflowStep> {
        let current = self.steps.iter().find(|s| s.step_number == n)?;
        if current.is_last_step {
            return None;
        }
        self.steps.iter().find(|s| s.step_number == n + 1)
    }

    pub fn binds_position(&self, position: PositionId) -> bool {
        self.steps.iter().any(|s| s.position_id == position)
    }
}

/// Structural checks shared by the loader and the seed validator.
pub fn validate_steps(steps: &[WorkflowStep]) -> Result<(), TorError> {
    if steps.is_empty() {
        return Err(TorError::InvalidWorkflow("workflow has no steps".into()));
    }
    for (i, step) in steps.iter().enumerate() {
        let expected = i as i32 + 1;
        if step.step_number != expected {
            return Err(TorError::InvalidWorkflow(format!(
                "step numbers must be contiguous from 1: expected {expected}, found {}",
                step.step_number
            )));
        }
        if !step.status_stage.is_approval() {
            return Err(TorError::InvalidWorkflow(format!(
                "step {} targets {}, which is not an approval stage",
                step.step_number, step.status_stage
            )));
        }
    }
    let last: Vec<i32> = steps
        .iter()
        .filter(|s| s.is_last_step)
        .map(|s| s.step_number)
        .collect();
    match last.as_slice() {
        [n] if *n == steps.len() as i32 => Ok(()),
        [n] => Err(TorError::InvalidWorkflow(format!(
            "last step is {n} but highest step is {}",
            steps.len()
        ))),
        [] => Err(TorError::InvalidWorkflow("no step is marked last".into())),
        many => Err(TorError::InvalidWorkflow(format!(
            "{} steps are marked last",
            many.len()
        ))),
    }
}

// ── Catalog ────────────────────────────────────────────────────

/// Loads and validates the active workflow for a unit.
#[derive(Clone)]
pub struct WorkflowCatalog {
    store: Arc<dyn WorkflowStore>,
}

impl WorkflowCatalog {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Missing, inactive, or empty workflows are "not configured". Malformed
    /// ones are invalid. Both are logged loudly since they block the unit.
    pub async fn load_for(&self, unit: UnitId) -> Result<WorkflowDefinition, TorError> {
        let record = match self.store.load_workflow_for_unit(unit).await? {
            Some(r) if r.is_active && !r.steps.is_empty() => r,
            _ => {
                error!(unit_id = unit.0, "no active workflow configured for unit");
                return Err(TorError::WorkflowNotConfigured(unit.to_string()));
            }
        };
        let workflow_id = record.id;
        WorkflowDefinition::from_record(record).map_err(|e| {
            error!(unit_id = unit.0, workflow_id = workflow_id.0, error = %e, "workflow failed validation");
            e
        })
    }

    /// Quiet variant for read paths: an unusable workflow is `None`.
    pub async fn find_for(&self, unit: UnitId) -> Result<Option<WorkflowDefinition>, TorError> {
        let Some(record) = self.store.load_workflow_for_unit(unit).await? else {
            return Ok(None);
        };
        if !record.is_active {
            return Ok(None);
        }
        match WorkflowDefinition::from_record(record) {
            Ok(wf) => Ok(Some(wf)),
            Err(e) => {
                debug!(unit_id = unit.0, error = %e, "ignoring unusable workflow");
                Ok(None)
            }
        }
    }
}
