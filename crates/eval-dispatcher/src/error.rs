use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors the Dispatcher's HTTP surface can return (§7). Each variant maps
/// to the HTTP status C2's retry table (§4.2 step 4) expects: 4xx other
/// than 408/429 are non-retryable, 429 signals transient quota exhaustion,
/// 5xx/503 are retried with the default policy.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request exceeds cluster resource quota: {0}")]
    QuotaRejected(String),
    #[error("transient resource exhaustion: {0}")]
    ResourceExhausted(String),
    #[error("invalid request: {0}")]
    ValidationError(String),
    #[error("isolation runtime unavailable: {0}")]
    IsolationUnavailable(String),
    #[error("execution unit not found: {0}")]
    NotFound(String),
    #[error("cluster scheduler unavailable: {0}")]
    SchedulerUnavailable(String),
    #[error("internal dispatcher error: {0}")]
    Internal(String),
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::QuotaRejected(_) | DispatchError::ValidationError(_) => {
                StatusCode::BAD_REQUEST
            }
            DispatchError::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            DispatchError::IsolationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::SchedulerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Classify a raw Kubernetes API error into a [`DispatchError`] (§4.3.3
/// step 5): a quota rejection from the scheduler is remapped to 429 so
/// the Worker retries instead of treating it as a permanent failure.
pub fn classify_kube_error(err: &kube::Error) -> DispatchError {
    if let kube::Error::Api(response) = err {
        if response.code == 403 && response.message.to_lowercase().contains("exceeded quota") {
            return DispatchError::ResourceExhausted(response.message.clone());
        }
        if response.code == 404 {
            return DispatchError::NotFound(response.message.clone());
        }
        return DispatchError::SchedulerUnavailable(format!(
            "{} ({})",
            response.message, response.code
        ));
    }
    DispatchError::SchedulerUnavailable(err.to_string())
}
