use thiserror::Error;

/// Errors surfaced by the persistence façade (§7 `StoreUnavailable`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("evaluation {0} not found")]
    NotFound(String),
    #[error("store backend unavailable: {0}")]
    Unavailable(String),
    #[error("record could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
