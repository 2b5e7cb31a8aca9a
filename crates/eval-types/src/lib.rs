//! Shared data model for the evaluation platform core: the authoritative
//! evaluation record, lifecycle events, resource parsing, and id
//! generation used by every other crate in the workspace.

mod ids;
mod record;
mod resource;
mod status;

pub use ids::{code_hash, derive_job_name, generate_evaluation_id};
pub use record::{EvaluationRecord, EventRecord, NewEvaluation, INLINE_THRESHOLD, PREVIEW_SIZE};
pub use resource::{
    min_cpu_millicores, min_memory_mb, parse_cpu_millicores, parse_memory_mb, Priority,
    ResourceParseError, ResourceRequest,
};
pub use status::{EvaluationStatus, UnknownStatus};
