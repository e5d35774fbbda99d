//! TOR document handlers.
//!
//! POST /tor                 : create a draft
//! GET  /tor?view=mine|pending
//! GET  /tor/:id             : detail with history and available actions
//! PUT  /tor/:id             : edit content
//! GET  /tor/:id/history
//! POST /tor/:id/submit
//! POST /tor/:id/approve
//! POST /tor/:id/revise      : body `{note}`
//! POST /tor/:id/reject      : body `{note}`
//! POST /tor/:id/export      : audit an export

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::{Extension, Json};
use tor_core::document::TorDocument;
use tor_core::history::ApprovalHistoryEntry;
use tor_core::principal::Session;
use tor_core::proto::{
    CreateTorRequest, ListTorsQuery, NoteRequest, TorDetail, TransitionResponse, UpdateTorRequest,
};
use tor_core::service::TorService;
use tor_core::types::TorId;

use crate::error::AppError;

type Service = Extension<Arc<dyn TorService>>;

pub async fn create_tor(
    Extension(service): Service,
    Extension(session): Extension<Session>,
    body: Result<Json<CreateTorRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TorDocument>), AppError> {
    let Json(req) = body?;
    let doc = service.create_tor(&session, req).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

pub async fn list_tors(
    Extension(service): Service,
    Extension(session): Extension<Session>,
    query: Result<Query<ListTorsQuery>, QueryRejection>,
) -> Result<Json<Vec<TorDocument>>, AppError> {
    let Query(query) = query?;
    Ok(Json(service.list_tors(&session, query).await?))
}

pub async fn get_tor(
    Extension(service): Service,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
) -> Result<Json<TorDetail>, AppError> {
    Ok(Json(service.get_tor(&session, TorId(id)).await?))
}

pub async fn update_tor(
    Extension(service): Service,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
    body: Result<Json<UpdateTorRequest>, JsonRejection>,
) -> Result<Json<TorDocument>, AppError> {
    let Json(req) = body?;
    Ok(Json(service.update_tor(&session, TorId(id), req).await?))
}

pub async fn history(
    Extension(service): Service,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ApprovalHistoryEntry>>, AppError> {
    Ok(Json(service.history(&session, TorId(id)).await?))
}

// ── Transitions ───────────────────────────────────────────────

pub async fn submit(
    Extension(service): Service,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
) -> Result<Json<TransitionResponse>, AppError> {
    Ok(Json(service.submit(&session, TorId(id)).await?))
}

pub async fn approve(
    Extension(service): Service,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
) -> Result<Json<TransitionResponse>, AppError> {
    Ok(Json(service.approve(&session, TorId(id)).await?))
}

pub async fn revise(
    Extension(service): Service,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
    body: Option<Json<NoteRequest>>,
) -> Result<Json<TransitionResponse>, AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(service.revise(&session, TorId(id), req).await?))
}

pub async fn reject(
    Extension(service): Service,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
    body: Option<Json<NoteRequest>>,
) -> Result<Json<TransitionResponse>, AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(service.reject(&session, TorId(id), req).await?))
}

pub async fn export(
    Extension(service): Service,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<ApprovalHistoryEntry>), AppError> {
    let entry = service.record_export(&session, TorId(id)).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
