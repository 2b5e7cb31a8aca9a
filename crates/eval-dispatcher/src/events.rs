//! Job state-change detection and lifecycle event publication (§4.3.6),
//! shared by the background watcher and the `GetJobStatus` polling path so
//! both observers agree on what counts as a transition.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use k8s_openapi::api::batch::v1::Job;
use serde_json::json;

use crate::job_phase::{self, JobPhase};
use crate::operations;
use crate::state::AppState;

/// How long a `job:{name}:last_state` entry survives, matching the
/// 5-minute watch-stream reconnect window it needs to outlive.
const LAST_STATE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_TIMEOUT_SECONDS: i64 = 300;

/// Inspect a job's current phase against its cached last-known state; if
/// it changed, update the cache and publish the matching lifecycle event.
/// A no-op if nothing changed, so callers can invoke this unconditionally.
pub async fn process_status_change(state: &Arc<AppState>, job: &Job) {
    let Some(job_name) = job.metadata.name.clone() else {
        return;
    };
    let Some(eval_id) = job_phase::eval_id_label(job) else {
        return;
    };
    let phase = job_phase::classify(job);

    let state_key = format!("job:{job_name}:last_state");
    let last_state = match state.bus.get_string(&state_key).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, %job_name, "failed to read last job state");
            None
        }
    };
    if last_state.as_deref() == Some(phase.as_str()) {
        return;
    }

    if let Err(e) = state
        .bus
        .set_string(&state_key, phase.as_str(), LAST_STATE_TTL)
        .await
    {
        tracing::warn!(error = %e, %job_name, "failed to cache job state");
    }
    tracing::info!(%job_name, from = ?last_state, to = phase.as_str(), "job state change");

    match phase {
        JobPhase::Running => publish_running(state, &eval_id, &job_name, job).await,
        JobPhase::Succeeded | JobPhase::Failed => {
            publish_completion(state, &eval_id, &job_name, job, phase).await
        }
        JobPhase::Pending => {}
    }
}

async fn publish_running(state: &Arc<AppState>, eval_id: &str, job_name: &str, job: &Job) {
    let timeout = job
        .spec
        .as_ref()
        .and_then(|s| s.active_deadline_seconds)
        .unwrap_or(DEFAULT_TIMEOUT_SECONDS);
    let started_at = job
        .status
        .as_ref()
        .and_then(|s| s.start_time.as_ref())
        .map(|t| t.0.to_rfc3339())
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    let payload = json!({
        "eval_id": eval_id,
        "executor_id": job_name,
        "container_id": job_name,
        "timeout": timeout,
        "started_at": started_at,
    });
    publish(state, "evaluation:running", &payload).await;
}

async fn publish_completion(state: &Arc<AppState>, eval_id: &str, job_name: &str, job: &Job, phase: JobPhase) {
    let logs = operations::get_job_logs(state, job_name, 100).await;
    let (logs_text, exit_code, source) = match logs {
        Ok(result) => (result.logs, result.exit_code, result.source),
        Err(e) => {
            tracing::warn!(error = %e, job_name, "failed to fetch job logs for lifecycle event");
            (String::new(), 1, "none")
        }
    };

    let completion_time = job
        .status
        .as_ref()
        .and_then(|s| s.completion_time.as_ref())
        .map(|t| t.0.to_rfc3339())
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    // succeeded counters can still carry a non-zero exit code (the
    // container ran to completion but the user's code failed).
    if phase == JobPhase::Succeeded && exit_code == 0 {
        let payload = json!({
            "eval_id": eval_id,
            "output": logs_text,
            "exit_code": exit_code,
            "metadata": {
                "job_name": job_name,
                "completed_at": completion_time,
                "log_source": source,
            },
        });
        publish(state, "evaluation:completed", &payload).await;
    } else {
        let error_text = if logs_text.is_empty() { "job failed".to_string() } else { logs_text };
        let payload = json!({
            "eval_id": eval_id,
            "error": error_text,
            "exit_code": exit_code,
            "metadata": {
                "job_name": job_name,
                "failed_at": completion_time,
                "log_source": source,
            },
        });
        publish(state, "evaluation:failed", &payload).await;
    }
}

/// Publish `evaluation:cancelled` for a unit removed from the cluster
/// while it was still in a non-terminal state (watcher `DELETED` events,
/// and `DeleteJob` calls).
pub async fn publish_cancelled(state: &Arc<AppState>, eval_id: &str, job_name: &str, reason: &str) {
    let payload = json!({
        "eval_id": eval_id,
        "job_name": job_name,
        "cancelled_at": Utc::now().to_rfc3339(),
        "reason": reason,
    });
    publish(state, "evaluation:cancelled", &payload).await;
}

/// Only cancel-publish a watcher `DELETED` event if the unit hadn't
/// already reached a terminal phase (a clean completion also deletes the
/// job once its TTL-after-finish elapses, and that isn't a cancellation).
pub async fn handle_deleted(state: &Arc<AppState>, job: &Job) {
    let Some(job_name) = job.metadata.name.clone() else {
        return;
    };
    let Some(eval_id) = job_phase::eval_id_label(job) else {
        return;
    };
    let state_key = format!("job:{job_name}:last_state");
    let last_state = state.bus.get_string(&state_key).await.ok().flatten();
    if matches!(last_state.as_deref(), Some("pending") | Some("running") | None) {
        publish_cancelled(state, &eval_id, &job_name, "job deleted").await;
    }
}

async fn publish(state: &Arc<AppState>, channel: &str, payload: &serde_json::Value) {
    let bytes = match serde_json::to_vec(payload) {
        Ok(b) => Bytes::from(b),
        Err(e) => {
            tracing::error!(error = %e, channel, "failed to serialize lifecycle event");
            return;
        }
    };
    if let Err(e) = state.bus.publish(channel, bytes).await {
        tracing::error!(error = %e, channel, "failed to publish lifecycle event");
    } else {
        tracing::info!(channel, "published lifecycle event");
    }
}
