use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use eval_broker::WorkItem;
use eval_types::{generate_evaluation_id, EvaluationRecord, EvaluationStatus, NewEvaluation};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;
use crate::validation;

const DEFAULT_LANGUAGE: &str = "python";
const DEFAULT_ENGINE: &str = "cpython";
const DEFAULT_TIMEOUT_SECONDS: u32 = 30;
const DEFAULT_MEMORY_LIMIT: &str = "512Mi";
const DEFAULT_CPU_LIMIT: &str = "500m";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/evaluations", post(submit_evaluation).get(list_evaluations))
        .route(
            "/evaluations/:id",
            get(get_evaluation).delete(cancel_evaluation),
        )
        .route("/queue/status", get(queue_status))
        .route("/healthz", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub code: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub priority: Option<i8>,
    #[serde(default)]
    pub memory_limit: Option<String>,
    #[serde(default)]
    pub cpu_limit: Option<String>,
    #[serde(default)]
    pub executor_image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: String,
    pub status: &'static str,
}

/// `SubmitEvaluation` (§4.1): mint an id, persist the initial record plus a
/// `submitted` event, enqueue a work item. A broker failure after a
/// successful persist is logged but not surfaced to the caller (§4.1).
async fn submit_evaluation(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    validation::validate_code_nonempty(&req.code)?;
    let timeout_seconds = req.timeout.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
    validation::validate_timeout(timeout_seconds, state.config.max_job_ttl)?;
    let priority = req.priority.unwrap_or(0);
    validation::validate_priority(priority)?;

    let memory_limit = req.memory_limit.unwrap_or_else(|| DEFAULT_MEMORY_LIMIT.to_string());
    let cpu_limit = req.cpu_limit.unwrap_or_else(|| DEFAULT_CPU_LIMIT.to_string());

    let capacity = state
        .dispatcher
        .check_capacity(
            eval_types::parse_memory_mb(&memory_limit)
                .map_err(|e| ApiError::InvalidRequest(format!("invalid memory_limit: {e}")))?,
            eval_types::parse_cpu_millicores(&cpu_limit)
                .map_err(|e| ApiError::InvalidRequest(format!("invalid cpu_limit: {e}")))?,
        )
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "capacity check against dispatcher failed");
            ApiError::Unavailable
        })?;
    validation::validate_against_quota(&memory_limit, &cpu_limit, &capacity)?;

    let now = Utc::now();
    let id = generate_evaluation_id(now);
    let language = req.language.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
    let engine = req.engine.unwrap_or_else(|| DEFAULT_ENGINE.to_string());

    let new = NewEvaluation {
        id: id.clone(),
        code: req.code.clone(),
        language: language.clone(),
        engine: engine.clone(),
        memory_limit: memory_limit.clone(),
        cpu_limit: cpu_limit.clone(),
        timeout_seconds,
        priority,
        executor_image: req.executor_image.clone(),
    };

    state.facade.create(new, now).await?;
    state
        .facade
        .add_event(&id, "submitted", "evaluation submitted", Map::new(), now)
        .await?;

    let item = WorkItem {
        eval_id: id.clone(),
        code: req.code,
        language,
        engine,
        timeout: timeout_seconds,
        memory_limit,
        cpu_limit,
        priority,
        executor_image: req.executor_image,
        retries: 0,
    };
    if let Err(e) = state.queue.enqueue(item).await {
        tracing::error!(error = %e, eval_id = %id, "failed to enqueue work item after persisting record");
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            id,
            status: "queued",
        }),
    ))
}

async fn get_evaluation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EvaluationRecord>, ApiError> {
    let record = state
        .facade
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(id.clone()))?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub evaluations: Vec<EvaluationRecord>,
    pub total: i64,
}

/// `ListEvaluations` (§4.1): paginated, newest first, exact counts for the
/// total (§9 Open Question resolution 1 — no approximated-count path).
async fn list_evaluations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let status = query
        .status
        .map(|s| s.parse::<EvaluationStatus>())
        .transpose()
        .map_err(|e| ApiError::InvalidRequest(format!("invalid status filter: {e}")))?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let evaluations = state.facade.list(limit, offset, status).await?;
    let total = state.facade.count(status).await?;
    Ok(Json(ListResponse { evaluations, total }))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub id: String,
    pub requested: bool,
}

/// `CancelEvaluation` (§4.1): requests deletion of the execution unit via
/// C3 if one is known on the ephemeral bus; the actual `cancelled`
/// transition is confirmed later by the Reconciler, not by this response.
async fn cancel_evaluation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    state
        .facade
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(id.clone()))?;

    let running = state.bus.get_hash(&format!("eval:{id}:running")).await?;
    let requested = match running.and_then(|h| h.get("job_name").cloned()) {
        Some(job_name) => {
            if let Err(e) = state.dispatcher.delete_job(&job_name).await {
                tracing::warn!(error = %e, %id, %job_name, "dispatcher delete_job failed");
                false
            } else {
                true
            }
        }
        None => false,
    };

    Ok(Json(CancelResponse { id, requested }))
}

#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    pub queue: QueueCounts,
    pub evaluations: EvaluationCounts,
}

#[derive(Debug, Serialize)]
pub struct QueueCounts {
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub workers: u32,
}

#[derive(Debug, Serialize)]
pub struct EvaluationCounts {
    pub total: i64,
    pub by_status: HashMap<String, i64>,
}

const ALL_STATUSES: [EvaluationStatus; 8] = [
    EvaluationStatus::Submitted,
    EvaluationStatus::Queued,
    EvaluationStatus::Provisioning,
    EvaluationStatus::Running,
    EvaluationStatus::Completed,
    EvaluationStatus::Failed,
    EvaluationStatus::Timeout,
    EvaluationStatus::Cancelled,
];

/// Supplemented read-only aggregation (§4.1), served entirely from C5's
/// `Count` operation plus the broker's queue depth.
async fn queue_status(State(state): State<AppState>) -> Result<Json<QueueStatusResponse>, ApiError> {
    let mut by_status = HashMap::new();
    for status in ALL_STATUSES {
        let count = state.facade.count(Some(status)).await?;
        by_status.insert(status.as_str().to_string(), count);
    }
    let total = state.facade.count(None).await?;

    let queued_depth = state.queue.depth().await.unwrap_or(0) as i64;

    Ok(Json(QueueStatusResponse {
        queue: QueueCounts {
            queued: queued_depth,
            running: *by_status.get("running").unwrap_or(&0),
            completed: *by_status.get("completed").unwrap_or(&0),
            failed: *by_status.get("failed").unwrap_or(&0),
            workers: state.config.worker_pool_size,
        },
        evaluations: EvaluationCounts { total, by_status },
    }))
}
