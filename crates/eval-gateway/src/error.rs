use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Gateway (C1) error taxonomy (§7): `InvalidRequest`, `Unavailable`,
/// `QuotaRejected` are the only classes the Gateway itself produces;
/// everything from downstream collaborators is folded into `Unavailable`
/// before it reaches a caller (§7 "C1 never surfaces internal errors
/// beyond `Unavailable` to callers").
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("evaluation {0} not found")]
    NotFound(String),
    #[error("request exceeds cluster quota: {0}")]
    QuotaRejected(String),
    #[error("service temporarily unavailable")]
    Unavailable,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::QuotaRejected(_) => (StatusCode::UNPROCESSABLE_ENTITY, "quota_rejected"),
            ApiError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        };
        let body = ErrorBody {
            error: kind.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<eval_storage::StoreError> for ApiError {
    fn from(e: eval_storage::StoreError) -> Self {
        match e {
            eval_storage::StoreError::NotFound(id) => ApiError::NotFound(id),
            other => {
                tracing::error!(error = %other, "persistence façade error");
                ApiError::Unavailable
            }
        }
    }
}

impl From<eval_broker::BrokerError> for ApiError {
    fn from(e: eval_broker::BrokerError) -> Self {
        tracing::error!(error = %e, "broker error");
        ApiError::Unavailable
    }
}

impl From<eval_bus::BusError> for ApiError {
    fn from(e: eval_bus::BusError) -> Self {
        tracing::error!(error = %e, "bus error");
        ApiError::Unavailable
    }
}
