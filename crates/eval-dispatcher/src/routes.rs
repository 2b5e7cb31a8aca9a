//! The Dispatcher's axum HTTP surface (§4.3.1), a thin wire layer over the
//! operations in [`crate::operations`]. Handlers translate between JSON and
//! the operation-level result types; no scheduler logic lives here.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::DispatchError;
use crate::image_catalog::CatalogImage;
use crate::operations::{self, ExecuteInput};
use crate::state::AppState;

const DEFAULT_TAIL_LINES: i64 = 500;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/capacity/check", get(check_capacity))
        .route("/execute", post(execute))
        .route("/status/:job_name", get(get_job_status))
        .route("/logs/:job_name", get(get_job_logs))
        .route("/images", get(list_images))
        .route("/jobs/:job_name", delete(delete_job))
        .route("/healthz", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct CapacityQuery {
    pub memory_mb: u64,
    pub cpu_millicores: u64,
}

#[derive(Debug, Serialize)]
pub struct CapacityResponse {
    pub has_capacity: bool,
    pub available_memory_mb: u64,
    pub available_cpu_millicores: u64,
    pub total_memory_mb: u64,
    pub total_cpu_millicores: u64,
    pub reason: Option<String>,
}

/// `GET /capacity/check` — `CheckCapacity` (§4.3.1).
async fn check_capacity(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CapacityQuery>,
) -> Result<Json<CapacityResponse>, DispatchError> {
    let result = operations::check_capacity(&state, query.memory_mb, query.cpu_millicores).await?;
    Ok(Json(CapacityResponse {
        has_capacity: result.has_capacity,
        available_memory_mb: result.available_memory_mb,
        available_cpu_millicores: result.available_cpu_millicores,
        total_memory_mb: result.total_memory_mb,
        total_cpu_millicores: result.total_cpu_millicores,
        reason: result.reason,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub evaluation_id: String,
    pub code: String,
    pub timeout: u32,
    pub memory_limit: String,
    pub cpu_limit: String,
    pub priority: i8,
    #[serde(default)]
    pub executor_image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub job_name: String,
    pub status: &'static str,
}

/// `POST /execute` — `Execute` (§4.3.3).
async fn execute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<ExecuteResponse>), DispatchError> {
    let input = ExecuteInput {
        evaluation_id: req.evaluation_id,
        code: req.code,
        timeout_seconds: req.timeout,
        memory_limit: req.memory_limit,
        cpu_limit: req.cpu_limit,
        priority: req.priority,
        executor_image: req.executor_image,
    };
    let result = operations::execute(&state, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(ExecuteResponse {
            job_name: result.job_name,
            status: result.status,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_name: String,
    pub status: &'static str,
    pub eval_id: Option<String>,
    pub exit_code: Option<i32>,
}

/// `GET /status/{job_name}` — `GetJobStatus` (§4.3.1). Read-only; the
/// polling fallback that republishes events from this data lives in the
/// Worker, not here, since only the Worker knows whether event-driven
/// monitoring is disabled for it.
async fn get_job_status(
    State(state): State<Arc<AppState>>,
    Path(job_name): Path<String>,
) -> Result<Json<JobStatusResponse>, DispatchError> {
    let result = operations::get_job_status(&state, &job_name).await?;
    let exit_code = if result.status == crate::job_phase::JobPhase::Failed && result.failed > 0 {
        Some(1)
    } else {
        None
    };
    Ok(Json(JobStatusResponse {
        job_name: result.job_name,
        status: result.status.as_str(),
        eval_id: result.eval_id,
        exit_code,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub tail_lines: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct JobLogsResponse {
    pub logs: String,
    pub exit_code: i32,
    pub source: &'static str,
}

/// `GET /logs/{job_name}` — `GetJobLogs` (§4.3.1), exposed exactly once
/// (§9 Open Question resolution 4) and delegating to the shared
/// [`operations::get_job_logs`] helper also used internally by the watcher.
async fn get_job_logs(
    State(state): State<Arc<AppState>>,
    Path(job_name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<JobLogsResponse>, DispatchError> {
    let tail_lines = query.tail_lines.unwrap_or(DEFAULT_TAIL_LINES);
    let result = operations::get_job_logs(&state, &job_name, tail_lines).await?;
    Ok(Json(JobLogsResponse {
        logs: result.logs,
        exit_code: result.exit_code,
        source: result.source,
    }))
}

/// `GET /images` — the image catalog read (§4.3.5 Supplemented behavior).
async fn list_images(State(state): State<Arc<AppState>>) -> Json<Vec<CatalogImage>> {
    Json(state.image_catalog.list().await)
}

#[derive(Debug, Serialize)]
pub struct DeleteJobResponse {
    pub job_name: String,
    pub eval_id: Option<String>,
}

/// `DELETE /jobs/{job_name}` — `DeleteJob` (§4.3.1).
async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(job_name): Path<String>,
) -> Result<Json<DeleteJobResponse>, DispatchError> {
    let result = operations::delete_job(&state, &job_name).await?;
    Ok(Json(DeleteJobResponse {
        job_name: result.job_name,
        eval_id: result.eval_id,
    }))
}
