use thiserror::Error;

/// Errors surfaced by the pub/sub + ephemeral-state bus (§7 `BusUnavailable`).
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus backend unavailable: {0}")]
    Unavailable(String),
    #[error("bus payload could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}
