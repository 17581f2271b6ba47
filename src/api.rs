use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::draft::{Draft, DraftStatus};
use crate::orchestrator::{Orchestrator, PhaseSummary, PipelineStatus};
use crate::publish::scheduler::CancelOutcome;
use crate::repo::RepositoryError;

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
}

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(pipeline_status))
        .route("/triggers/fetch-sources", post(trigger_fetch))
        .route("/triggers/process-queue", post(trigger_process))
        .route("/triggers/auto-publish", post(trigger_publish))
        .route("/triggers/cleanup", post(trigger_cleanup))
        .route("/triggers/cycle", post(trigger_cycle))
        .route("/drafts", get(list_drafts))
        .route("/drafts/{id}", get(get_draft))
        .route("/drafts/{id}/approve", post(approve_draft))
        .route("/drafts/{id}/reject", post(reject_draft))
        .route("/drafts/{id}/cancel", post(cancel_draft))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ------------------------------------------------------------
// Error mapping
// ------------------------------------------------------------

struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        let status = match &e {
            RepositoryError::NotFound(_) => StatusCode::NOT_FOUND,
            RepositoryError::Conflict { .. }
            | RepositoryError::Transition(_)
            | RepositoryError::DuplicateEvent(_) => StatusCode::CONFLICT,
            RepositoryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

// ------------------------------------------------------------
// Triggers
// ------------------------------------------------------------

async fn trigger_fetch(State(state): State<AppState>) -> Json<PhaseSummary> {
    Json(state.orchestrator.run_fetch().await)
}

async fn trigger_process(State(state): State<AppState>) -> Json<PhaseSummary> {
    Json(state.orchestrator.run_process().await)
}

async fn trigger_publish(State(state): State<AppState>) -> Json<PhaseSummary> {
    Json(state.orchestrator.run_publish().await)
}

async fn trigger_cleanup(State(state): State<AppState>) -> Json<PhaseSummary> {
    Json(state.orchestrator.run_cleanup().await)
}

async fn trigger_cycle(State(state): State<AppState>) -> Json<Vec<PhaseSummary>> {
    Json(state.orchestrator.run_cycle().await)
}

async fn pipeline_status(
    State(state): State<AppState>,
) -> Result<Json<PipelineStatus>, ApiError> {
    Ok(Json(state.orchestrator.status()?))
}

// ------------------------------------------------------------
// Drafts
// ------------------------------------------------------------

/// Compact row for the queue views; the detail endpoint serves the full draft.
#[derive(Serialize)]
struct DraftRow {
    id: Uuid,
    status: DraftStatus,
    title: String,
    source_name: String,
    category: &'static str,
    fact_check: Option<f32>,
    seo_score: Option<f32>,
    attempts: u32,
    publish_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl DraftRow {
    fn new(d: Draft, primary_lang: &str) -> Self {
        let title = d
            .title
            .get(primary_lang)
            .cloned()
            .unwrap_or_else(|| d.raw_title.clone());
        Self {
            id: d.id,
            status: d.status,
            title,
            source_name: d.source_name,
            category: d.category.as_str(),
            fact_check: d.fact_check,
            seo_score: d.seo_score,
            attempts: d.attempts,
            publish_at: d.publish_at,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Deserialize)]
struct DraftsQuery {
    status: Option<String>,
}

fn parse_status(s: &str) -> Option<DraftStatus> {
    match s.to_ascii_uppercase().as_str() {
        "DRAFT" => Some(DraftStatus::Draft),
        "PROCESSING" => Some(DraftStatus::Processing),
        "PENDING_OK" => Some(DraftStatus::PendingOk),
        "AUTO_READY" => Some(DraftStatus::AutoReady),
        "SCHEDULED" => Some(DraftStatus::Scheduled),
        "PUBLISHED" => Some(DraftStatus::Published),
        "REJECTED" => Some(DraftStatus::Rejected),
        _ => None,
    }
}

async fn list_drafts(
    State(state): State<AppState>,
    Query(q): Query<DraftsQuery>,
) -> Result<Json<Vec<DraftRow>>, ApiError> {
    let repo = state.orchestrator.repo();
    let drafts = match q.status.as_deref() {
        Some(raw) => {
            let status =
                parse_status(raw).ok_or_else(|| bad_request(format!("unknown status '{raw}'")))?;
            repo.list_by_status(status)?
        }
        None => repo.list_recent(50)?,
    };
    let primary = state.orchestrator.primary_language();
    Ok(Json(
        drafts
            .into_iter()
            .map(|d| DraftRow::new(d, primary))
            .collect(),
    ))
}

async fn get_draft(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Draft>, ApiError> {
    let draft = state
        .orchestrator
        .repo()
        .get(id)?
        .ok_or(RepositoryError::NotFound(id))?;
    Ok(Json(draft))
}

// ------------------------------------------------------------
// Editorial actions
// ------------------------------------------------------------

#[derive(Default, Deserialize)]
struct ApproveReq {
    /// True arms the publish window right away; false parks the draft in
    /// AUTO_READY for the next publish phase.
    #[serde(default)]
    schedule: bool,
}

async fn approve_draft(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ApproveReq>>,
) -> Result<Json<Draft>, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let draft = state.orchestrator.approve_draft(id, req.schedule)?;
    Ok(Json(draft))
}

#[derive(Default, Deserialize)]
struct RejectReq {
    #[serde(default)]
    reason: Option<String>,
}

async fn reject_draft(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<RejectReq>>,
) -> Result<Json<Draft>, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let reason = req.reason.as_deref().unwrap_or("rejected by editor");
    let draft = state.orchestrator.reject_draft(id, reason)?;
    Ok(Json(draft))
}

#[derive(Serialize)]
struct CancelResp {
    outcome: &'static str,
}

async fn cancel_draft(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let outcome = state
        .orchestrator
        .scheduler()
        .cancel(state.orchestrator.repo(), id)?;
    let (status, outcome) = match outcome {
        CancelOutcome::Reverted => (StatusCode::OK, "reverted"),
        CancelOutcome::TooLate => (StatusCode::CONFLICT, "too-late"),
        CancelOutcome::NotScheduled => (StatusCode::CONFLICT, "not-scheduled"),
    };
    Ok((status, Json(CancelResp { outcome })).into_response())
}
