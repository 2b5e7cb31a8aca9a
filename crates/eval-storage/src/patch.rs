use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use eval_types::EvaluationStatus;

/// A partial update applied by [`crate::Facade::update`] (§4.5 `Update`).
/// `None` fields are left untouched; `metadata` is merged per-key rather
/// than replacing the record's map.
#[derive(Debug, Clone, Default)]
pub struct UpdatePatch {
    pub status: Option<EvaluationStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub runtime_ms: Option<i64>,
    /// Full, un-truncated output; externalization is applied by the
    /// façade, not by the caller.
    pub output: Option<String>,
    /// Full, un-truncated error text; externalization is applied by the
    /// façade, not by the caller.
    pub error: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl UpdatePatch {
    pub fn status(status: EvaluationStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_output(mut self, output: String) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    pub fn with_runtime_ms(mut self, runtime_ms: i64) -> Self {
        self.runtime_ms = Some(runtime_ms);
        self
    }
}
