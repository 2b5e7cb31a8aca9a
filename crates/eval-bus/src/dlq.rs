use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A dead-letter entry (§6): pushed once a work item's retry budget is
/// exhausted, alongside the evaluation's terminal `failed` transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub task_id: String,
    pub name: String,
    pub evaluation_id: String,
    pub args: Value,
    pub exception_class: String,
    pub traceback: String,
    pub retries: u32,
    pub metadata: Map<String, Value>,
}
