use serde::{Deserialize, Serialize};

/// The at-least-once work item enqueued by the Gateway and consumed by the
/// Worker (§6 "Work-item schema").
///
/// Retry state travels with the item itself rather than in an external
/// store: `retries` is incremented by the Worker on each `nack_with_delay`
/// and inspected against `MAX_RETRIES`/`MAX_QUOTA_RETRIES` before the next
/// attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub eval_id: String,
    pub code: String,
    pub language: String,
    pub engine: String,
    pub timeout: u32,
    pub memory_limit: String,
    pub cpu_limit: String,
    pub priority: i8,
    pub executor_image: Option<String>,
    #[serde(default)]
    pub retries: u32,
}
