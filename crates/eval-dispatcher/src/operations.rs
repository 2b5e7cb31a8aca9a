//! The Dispatcher's five operations (§4.3.1), implemented against the
//! cluster scheduler client held in [`AppState`].

use std::sync::Arc;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, ResourceQuota};
use kube::api::{Api, DeleteParams, ListParams, Propagation};

use eval_types::{derive_job_name, parse_cpu_millicores, parse_memory_mb, Priority};

use crate::error::{classify_kube_error, DispatchError};
use crate::job_phase::{self, JobPhase};
use crate::manifest::{self, ManifestInput};
use crate::state::AppState;

const QUOTA_NAME: &str = "evaluation-quota";
const UNBOUNDED_MB: u64 = 99_999;
const UNBOUNDED_MILLICORES: u64 = 99_999;

pub struct CapacityResult {
    pub has_capacity: bool,
    pub available_memory_mb: u64,
    pub available_cpu_millicores: u64,
    pub total_memory_mb: u64,
    pub total_cpu_millicores: u64,
    pub reason: Option<String>,
}

/// `CheckCapacity` (§4.3.1): reads the namespace's resource quota and
/// compares free headroom against the request. A missing quota object
/// means capacity is treated as effectively unbounded.
pub async fn check_capacity(
    state: &AppState,
    requested_memory_mb: u64,
    requested_cpu_millicores: u64,
) -> Result<CapacityResult, DispatchError> {
    let api: Api<ResourceQuota> = Api::namespaced(state.client.clone(), &state.config.namespace);
    let quota = match api.get(QUOTA_NAME).await {
        Ok(q) => q,
        Err(kube::Error::Api(response)) if response.code == 404 => {
            tracing::warn!("no resource quota found, assuming capacity is available");
            return Ok(CapacityResult {
                has_capacity: true,
                available_memory_mb: UNBOUNDED_MB,
                available_cpu_millicores: UNBOUNDED_MILLICORES,
                total_memory_mb: UNBOUNDED_MB,
                total_cpu_millicores: UNBOUNDED_MILLICORES,
                reason: Some("no resource quota configured".to_string()),
            });
        }
        Err(e) => return Err(classify_kube_error(&e)),
    };

    let status = quota.status.unwrap_or_default();
    let hard = status.hard.unwrap_or_default();
    let used = status.used.unwrap_or_default();

    let total_memory_mb = quantity_mb(hard.get("limits.memory"));
    let used_memory_mb = quantity_mb(used.get("limits.memory"));
    let total_cpu_millicores = quantity_cpu(hard.get("limits.cpu"));
    let used_cpu_millicores = quantity_cpu(used.get("limits.cpu"));

    let available_memory_mb = total_memory_mb.saturating_sub(used_memory_mb);
    let available_cpu_millicores = total_cpu_millicores.saturating_sub(used_cpu_millicores);

    let has_capacity =
        available_memory_mb >= requested_memory_mb && available_cpu_millicores >= requested_cpu_millicores;

    let reason = if has_capacity {
        None
    } else if available_memory_mb < requested_memory_mb {
        Some(format!(
            "insufficient memory: {available_memory_mb}MB available, {requested_memory_mb}MB requested"
        ))
    } else {
        Some(format!(
            "insufficient CPU: {available_cpu_millicores}m available, {requested_cpu_millicores}m requested"
        ))
    };

    Ok(CapacityResult {
        has_capacity,
        available_memory_mb,
        available_cpu_millicores,
        total_memory_mb,
        total_cpu_millicores,
        reason,
    })
}

fn quantity_mb(q: Option<&k8s_openapi::apimachinery::pkg::api::resource::Quantity>) -> u64 {
    q.and_then(|q| parse_memory_mb(&q.0).ok()).unwrap_or(0)
}

fn quantity_cpu(q: Option<&k8s_openapi::apimachinery::pkg::api::resource::Quantity>) -> u64 {
    q.and_then(|q| parse_cpu_millicores(&q.0).ok()).unwrap_or(0)
}

pub struct ExecuteInput {
    pub evaluation_id: String,
    pub code: String,
    pub timeout_seconds: u32,
    pub memory_limit: String,
    pub cpu_limit: String,
    pub priority: i8,
    pub executor_image: Option<String>,
}

pub struct ExecuteResult {
    pub job_name: String,
    pub status: &'static str,
}

/// `Execute` (§4.3.3).
pub async fn execute(state: &AppState, input: ExecuteInput) -> Result<ExecuteResult, DispatchError> {
    validate_against_quota_totals(state, &input.memory_limit, &input.cpu_limit).await?;

    let image = state.image_catalog.resolve(input.executor_image.as_deref()).await;

    let isolation_available = state
        .isolation
        .is_available(&state.client, &state.config.environment, &state.config.host_os)
        .await;
    let bypass = crate::isolation::bypass_allowed(&state.config.environment, &state.config.host_os);
    if !isolation_available && !bypass {
        return Err(DispatchError::IsolationUnavailable(format!(
            "isolation runtime required but unavailable in {} environment",
            state.config.environment
        )));
    }

    let job_name = derive_job_name(&input.evaluation_id);
    let manifest_input = ManifestInput {
        job_name: &job_name,
        evaluation_id: &input.evaluation_id,
        code: &input.code,
        timeout_seconds: input.timeout_seconds,
        memory_limit: &input.memory_limit,
        cpu_limit: &input.cpu_limit,
        priority: Priority::from_i8(input.priority),
        image: &image,
        isolation_runtime_class: isolation_available.then_some("gvisor"),
        job_cleanup_ttl: state.config.job_cleanup_ttl,
    };
    let job = manifest::build_job(&manifest_input);

    let api: Api<Job> = Api::namespaced(state.client.clone(), &state.config.namespace);
    api.create(&Default::default(), &job)
        .await
        .map_err(|e| classify_kube_error(&e))?;

    tracing::info!(
        job_name = %job_name,
        evaluation_id = %input.evaluation_id,
        isolation = isolation_available,
        "created execution unit"
    );

    Ok(ExecuteResult {
        job_name,
        status: "created",
    })
}

async fn validate_against_quota_totals(
    state: &AppState,
    memory_limit: &str,
    cpu_limit: &str,
) -> Result<(), DispatchError> {
    let api: Api<ResourceQuota> = Api::namespaced(state.client.clone(), &state.config.namespace);
    let quota = match api.get(QUOTA_NAME).await {
        Ok(q) => q,
        Err(kube::Error::Api(response)) if response.code == 404 => {
            tracing::warn!("no resource quota found, skipping absolute-limit validation");
            return Ok(());
        }
        Err(e) => return Err(classify_kube_error(&e)),
    };

    let hard = quota.status.unwrap_or_default().hard.unwrap_or_default();
    let total_memory_mb = quantity_mb(hard.get("limits.memory"));
    let total_cpu_millicores = quantity_cpu(hard.get("limits.cpu"));

    let requested_memory_mb = parse_memory_mb(memory_limit)
        .map_err(|e| DispatchError::ValidationError(format!("invalid memory_limit: {e}")))?;
    let requested_cpu_millicores = parse_cpu_millicores(cpu_limit)
        .map_err(|e| DispatchError::ValidationError(format!("invalid cpu_limit: {e}")))?;

    if requested_memory_mb > total_memory_mb {
        return Err(DispatchError::QuotaRejected(format!(
            "requested memory ({memory_limit}) exceeds total cluster limit ({total_memory_mb}MB)"
        )));
    }
    if requested_cpu_millicores > total_cpu_millicores {
        return Err(DispatchError::QuotaRejected(format!(
            "requested CPU ({cpu_limit}) exceeds total cluster limit ({total_cpu_millicores}m)"
        )));
    }
    Ok(())
}

pub struct JobStatusResult {
    pub job_name: String,
    pub status: JobPhase,
    pub eval_id: Option<String>,
    pub active: i32,
    pub succeeded: i32,
    pub failed: i32,
}

/// `GetJobStatus` (§4.3.1). Callers that need side-effecting event
/// publication (the polling fallback) do so themselves using the returned
/// classification; this function only reads.
pub async fn get_job_status(state: &AppState, job_name: &str) -> Result<JobStatusResult, DispatchError> {
    let api: Api<Job> = Api::namespaced(state.client.clone(), &state.config.namespace);
    let job = api.get_status(job_name).await.map_err(|e| classify_kube_error(&e))?;
    let status = job_phase::classify(&job);
    let eval_id = job_phase::eval_id_label(&job);
    let counters = job.status.unwrap_or_default();

    Ok(JobStatusResult {
        job_name: job_name.to_string(),
        status,
        eval_id,
        active: counters.active.unwrap_or(0),
        succeeded: counters.succeeded.unwrap_or(0),
        failed: counters.failed.unwrap_or(0),
    })
}

pub struct JobLogsResult {
    pub logs: String,
    pub exit_code: i32,
    pub source: &'static str,
}

/// `GetJobLogs` (§4.3.1): primary source is the unit's pod via the cluster
/// API; falls back to the log-aggregation backend once the pod has been
/// garbage-collected.
pub async fn get_job_logs(
    state: &AppState,
    job_name: &str,
    tail_lines: i64,
) -> Result<JobLogsResult, DispatchError> {
    let pods: Api<Pod> = Api::namespaced(state.client.clone(), &state.config.namespace);
    let list = pods
        .list(&ListParams::default().labels(&format!("job-name={job_name}")))
        .await
        .map_err(|e| classify_kube_error(&e))?;

    let Some(pod) = list.items.into_iter().next() else {
        return fallback_to_log_aggregation(state, job_name).await;
    };

    let pod_name = pod.metadata.name.clone().unwrap_or_default();
    let log_params = kube::api::LogParams {
        tail_lines: Some(tail_lines),
        ..Default::default()
    };
    let logs = match pods.logs(&pod_name, &log_params).await {
        Ok(logs) => logs,
        Err(kube::Error::Api(response)) if response.code == 404 => {
            return fallback_to_log_aggregation(state, job_name).await;
        }
        Err(e) => return Err(classify_kube_error(&e)),
    };

    let exit_code = pod
        .status
        .and_then(|s| s.container_statuses)
        .and_then(|statuses| statuses.into_iter().next())
        .and_then(|status| status.state)
        .and_then(|state| state.terminated)
        .and_then(|terminated| terminated.exit_code)
        .unwrap_or(0);

    Ok(JobLogsResult {
        logs,
        exit_code,
        source: "kubernetes",
    })
}

async fn fallback_to_log_aggregation(
    state: &AppState,
    job_name: &str,
) -> Result<JobLogsResult, DispatchError> {
    tracing::info!(job_name, "no pods found, checking log aggregation backend");
    if let Some(client) = &state.log_aggregation {
        if let Some(logs) = client.query_job_logs(&state.config.namespace, job_name).await {
            return Ok(JobLogsResult {
                logs,
                exit_code: 0,
                source: "log-aggregation",
            });
        }
    }
    Ok(JobLogsResult {
        logs: String::new(),
        exit_code: 1,
        source: "none",
    })
}

pub struct DeleteResult {
    pub job_name: String,
    pub eval_id: Option<String>,
}

/// `DeleteJob` (§4.3.1): foreground-propagated delete, then publishes
/// `evaluation:cancelled` if the unit carried an eval-id label.
pub async fn delete_job(state: &Arc<AppState>, job_name: &str) -> Result<DeleteResult, DispatchError> {
    let api: Api<Job> = Api::namespaced(state.client.clone(), &state.config.namespace);
    let job = api.get(job_name).await.map_err(|e| classify_kube_error(&e))?;
    let eval_id = job_phase::eval_id_label(&job);

    api.delete(
        job_name,
        &DeleteParams {
            propagation_policy: Some(Propagation::Foreground),
            ..Default::default()
        },
    )
    .await
    .map_err(|e| classify_kube_error(&e))?;

    if let Some(eval_id) = &eval_id {
        crate::events::publish_cancelled(state, eval_id, job_name, "job deleted via API").await;
    }

    Ok(DeleteResult {
        job_name: job_name.to_string(),
        eval_id,
    })
}

