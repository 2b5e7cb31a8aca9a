use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CallError;

/// HTTP client for the Dispatcher's (C3) `CheckCapacity` and `Execute`
/// operations, with a 30s per-call client timeout (§5 "Worker-level" is
/// one of the three timeout surfaces).
pub struct DispatcherClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityResponse {
    pub has_capacity: bool,
    pub available_memory_mb: u64,
    pub available_cpu_millicores: u64,
    pub total_memory_mb: u64,
    pub total_cpu_millicores: u64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequest {
    pub evaluation_id: String,
    pub code: String,
    pub timeout: u32,
    pub memory_limit: String,
    pub cpu_limit: String,
    pub priority: i8,
    pub executor_image: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteResponse {
    pub job_name: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobStatusResponse {
    /// One of `pending`, `running`, `succeeded`, `failed` (§4.3.6
    /// classification: `active>0 -> running`, `succeeded>0 -> succeeded`,
    /// `failed>0 -> failed`, else `pending`).
    pub status: String,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobLogsResponse {
    pub logs: String,
    pub exit_code: Option<i32>,
}

impl DispatcherClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with default config"),
        }
    }

    pub async fn check_capacity(
        &self,
        memory_mb: u64,
        cpu_millicores: u64,
    ) -> Result<CapacityResponse, CallError> {
        let response = self
            .http
            .get(format!("{}/capacity/check", self.base_url))
            .query(&[
                ("memory_mb", memory_mb.to_string()),
                ("cpu_millicores", cpu_millicores.to_string()),
            ])
            .send()
            .await
            .map_err(classify_transport_error)?;
        handle_response(response).await
    }

    pub async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResponse, CallError> {
        let response = self
            .http
            .post(format!("{}/execute", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;
        handle_response(response).await
    }

    /// Used by the polling fallback (§4.2 step 5) when event-driven status
    /// monitoring is disabled.
    pub async fn get_job_status(&self, job_name: &str) -> Result<JobStatusResponse, CallError> {
        let response = self
            .http
            .get(format!("{}/status/{}", self.base_url, job_name))
            .send()
            .await
            .map_err(classify_transport_error)?;
        handle_response(response).await
    }

    pub async fn get_job_logs(&self, job_name: &str) -> Result<JobLogsResponse, CallError> {
        let response = self
            .http
            .get(format!("{}/logs/{}", self.base_url, job_name))
            .send()
            .await
            .map_err(classify_transport_error)?;
        handle_response(response).await
    }
}

fn classify_transport_error(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        CallError::Timeout
    } else {
        CallError::Connection(e.to_string())
    }
}

async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, CallError> {
    let status = response.status();
    if status.is_success() {
        response
            .json()
            .await
            .map_err(|e| CallError::Connection(format!("malformed dispatcher response: {e}")))
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(CallError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
