use thiserror::Error;

/// Errors surfaced by the at-least-once work queue (§7 `BrokerUnavailable`).
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker backend unavailable: {0}")]
    Unavailable(String),
    #[error("work item could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}
