//! GET /workflows/:unit_id: approval chain for a unit, with current holders.

use std::sync::Arc;

use axum::extract::Path;
use axum::{Extension, Json};
use tor_core::principal::Session;
use tor_core::proto::WorkflowView;
use tor_core::service::TorService;
use tor_core::types::UnitId;

use crate::error::AppError;

pub async fn get_workflow(
    Extension(service): Extension<Arc<dyn TorService>>,
    Extension(session): Extension<Session>,
    Path(unit_id): Path<i64>,
) -> Result<Json<WorkflowView>, AppError> {
    let view = service.workflow_for_unit(&session, UnitId(unit_id)).await?;
    Ok(Json(view))
}
