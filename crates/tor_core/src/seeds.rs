//! SeedBundle: YAML description of an organization and its workflows.
//! Validated here, applied by each store.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::TorError;
use crate::org::{OrganizationalUnit, Position, UserRecord};
use crate::workflow::{validate_steps, WorkflowRecord};

const DEMO_YAML: &str = include_str!("../seeds/demo.yaml");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedBundle {
    #[serde(default)]
    pub units: Vec<OrganizationalUnit>,
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub workflows: Vec<WorkflowRecord>,
}

impl SeedBundle {
    pub fn from_yaml(text: &str) -> Result<Self, TorError> {
        let bundle: SeedBundle = serde_yaml::from_str(text)
            .map_err(|e| TorError::invalid(format!("seed bundle is not valid YAML: {e}")))?;
        bundle.validate()?;
        Ok(bundle)
    }

    /// HAR_MEC with a three-step chain, plus K3 without a workflow.
    pub fn demo() -> Result<Self, TorError> {
        Self::from_yaml(DEMO_YAML)
    }

    /// Referential checks plus workflow structure. Stops at the first problem.
    pub fn validate(&self) -> Result<(), TorError> {
        let mut unit_ids = HashSet::new();
        let mut unit_codes = HashSet::new();
        for u in &self.units {
            if !unit_ids.insert(u.id) {
                return Err(TorError::invalid(format!("duplicate unit id {}", u.id)));
            }
            if !unit_codes.insert(u.code.as_str()) {
                return Err(TorError::invalid(format!("duplicate unit code {}", u.code)));
            }
        }

        let mut positions = HashMap::new();
        for p in &self.positions {
            if let Some(unit) = p.unit_id {
                if !unit_ids.contains(&unit) {
                    return Err(TorError::invalid(format!(
                        "position {} references unknown unit {unit}",
                        p.id
                    )));
                }
            }
            if positions.insert(p.id, p).is_some() {
                return Err(TorError::invalid(format!("duplicate position id {}", p.id)));
            }
        }

        let mut user_ids = HashSet::new();
        for u in &self.users {
            if !user_ids.insert(u.id) {
                return Err(TorError::invalid(format!("duplicate user id {}", u.id)));
            }
            if let Some(pos) = u.position_id {
                if !positions.contains_key(&pos) {
                    return Err(TorError::invalid(format!(
                        "user {} references unknown position {pos}",
                        u.id
                    )));
                }
            }
        }

        let mut workflow_units = HashSet::new();
        for wf in &self.workflows {
            if !unit_ids.contains(&wf.unit_id) {
                return Err(TorError::invalid(format!(
                    "workflow {} references unknown unit {}",
                    wf.id, wf.unit_id
                )));
            }
            if !workflow_units.insert(wf.unit_id) {
                return Err(TorError::invalid(format!(
                    "unit {} has more than one workflow",
                    wf.unit_id
                )));
            }
            for step in &wf.steps {
                if !positions.contains_key(&step.position_id) {
                    return Err(TorError::invalid(format!(
                        "workflow {} step {} references unknown position {}",
                        wf.id, step.step_number, step.position_id
                    )));
                }
            }
            let mut steps = wf.steps.clone();
            steps.sort_by_key(|s| s.step_number);
            validate_steps(&steps).map_err(|e| {
                TorError::InvalidWorkflow(format!("workflow {}: {e}", wf.id))
            })?;
        }
        Ok(())
    }
}
