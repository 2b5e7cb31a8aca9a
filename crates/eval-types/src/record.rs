use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::EvaluationStatus;

/// Inline prefix threshold: fields larger than this are externalized.
pub const INLINE_THRESHOLD: u64 = 1024 * 1024;
/// Size of the inline prefix kept for an externalized field.
pub const PREVIEW_SIZE: usize = 1024;

/// The authoritative evaluation record (§3). Owned exclusively by the
/// Reconciler (plus the façade's own overflow bookkeeping); read by
/// everyone else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: String,
    pub code_hash: String,
    pub status: EvaluationStatus,
    pub language: String,
    pub engine: String,

    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub memory_limit: String,
    pub cpu_limit: String,
    pub timeout_seconds: u32,
    pub priority: i8,
    pub executor_image: Option<String>,

    pub exit_code: Option<i32>,
    pub runtime_ms: Option<i64>,

    pub output: Option<String>,
    pub output_truncated: bool,
    pub output_size: Option<u64>,
    pub output_location: Option<String>,

    pub error: Option<String>,
    pub error_truncated: bool,
    pub error_size: Option<u64>,
    pub error_location: Option<String>,

    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct NewEvaluation {
    pub id: String,
    pub code: String,
    pub language: String,
    pub engine: String,
    pub memory_limit: String,
    pub cpu_limit: String,
    pub timeout_seconds: u32,
    pub priority: i8,
    pub executor_image: Option<String>,
}

impl EvaluationRecord {
    /// Construct the record the Gateway persists at submission time:
    /// `status = queued`, both `created_at` and `queued_at` set. The
    /// `code_lines`/`code_size` display fields (supplemented from the
    /// original schema) are computed once here and merged into metadata.
    pub fn new_queued(new: NewEvaluation, now: DateTime<Utc>) -> Self {
        let mut metadata = Map::new();
        metadata.insert("code_lines".into(), Value::from(new.code.lines().count()));
        metadata.insert("code_size".into(), Value::from(new.code.len()));

        Self {
            id: new.id,
            code_hash: crate::ids::code_hash(&new.code),
            status: EvaluationStatus::Queued,
            language: new.language,
            engine: new.engine,
            created_at: now,
            queued_at: Some(now),
            started_at: None,
            completed_at: None,
            memory_limit: new.memory_limit,
            cpu_limit: new.cpu_limit,
            timeout_seconds: new.timeout_seconds,
            priority: new.priority,
            executor_image: new.executor_image,
            exit_code: None,
            runtime_ms: None,
            output: None,
            output_truncated: false,
            output_size: None,
            output_location: None,
            error: None,
            error_truncated: false,
            error_size: None,
            error_location: None,
            metadata,
        }
    }

    /// Apply a status transition if allowed by the state machine (§3
    /// invariants 1 & 2). Returns `false` (no-op) if the transition is
    /// disallowed or redundant (already terminal / already in `next`).
    pub fn try_transition(&mut self, next: EvaluationStatus, now: DateTime<Utc>) -> bool {
        if self.status == next {
            return false;
        }
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        true
    }

    /// Synthesize a placeholder record for an evaluation the Reconciler
    /// observes before its Gateway-created record is visible (at-least-once
    /// or reordered lifecycle-event delivery, §4.4 step 1 "if missing,
    /// create it idempotently"). `status` is the nearest predecessor the
    /// triggering event's own transition is valid from, so the normal
    /// transition table still applies once the caller reduces the event
    /// against the record this returns.
    pub fn new_placeholder(id: impl Into<String>, status: EvaluationStatus, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            code_hash: String::new(),
            status,
            language: String::new(),
            engine: String::new(),
            created_at: now,
            queued_at: None,
            started_at: None,
            completed_at: None,
            memory_limit: String::new(),
            cpu_limit: String::new(),
            timeout_seconds: 0,
            priority: 0,
            executor_image: None,
            exit_code: None,
            runtime_ms: None,
            output: None,
            output_truncated: false,
            output_size: None,
            output_location: None,
            error: None,
            error_truncated: false,
            error_size: None,
            error_location: None,
            metadata: Map::new(),
        }
    }

    /// Merge caller-supplied metadata into the existing map, per-key
    /// overwrite (§4.5 metadata merging) rather than replacement.
    pub fn merge_metadata(&mut self, incoming: Map<String, Value>) {
        for (k, v) in incoming {
            self.metadata.insert(k, v);
        }
    }

    /// `true` once the record has left its provisioning/running phase
    /// permanently.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Append-only lifecycle event (§3 Event record).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub evaluation_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub metadata: Map<String, Value>,
}

impl EventRecord {
    pub fn new(
        evaluation_id: impl Into<String>,
        event_type: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            evaluation_id: evaluation_id.into(),
            event_type: event_type.into(),
            timestamp: now,
            message: message.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(now: DateTime<Utc>) -> EvaluationRecord {
        EvaluationRecord::new_queued(
            NewEvaluation {
                id: "20260728_130509_deadbeef".into(),
                code: "print('hi')\nprint('again')".into(),
                language: "python".into(),
                engine: "cpython".into(),
                memory_limit: "512Mi".into(),
                cpu_limit: "500m".into(),
                timeout_seconds: 30,
                priority: 0,
                executor_image: None,
            },
            now,
        )
    }

    #[test]
    fn new_queued_sets_timestamps_and_derived_metadata() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 13, 5, 9).unwrap();
        let record = sample(now);
        assert_eq!(record.status, EvaluationStatus::Queued);
        assert_eq!(record.created_at, now);
        assert_eq!(record.queued_at, Some(now));
        assert_eq!(record.metadata.get("code_lines"), Some(&Value::from(2)));
    }

    #[test]
    fn try_transition_is_monotonic_once_terminal() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 13, 5, 9).unwrap();
        let mut record = sample(now);
        assert!(record.try_transition(EvaluationStatus::Provisioning, now));
        assert!(record.try_transition(EvaluationStatus::Running, now));
        assert!(record.try_transition(EvaluationStatus::Completed, now));
        assert_eq!(record.completed_at, Some(now));

        // Once terminal, no further transition succeeds.
        assert!(!record.try_transition(EvaluationStatus::Failed, now));
        assert_eq!(record.status, EvaluationStatus::Completed);
    }

    #[test]
    fn duplicate_transition_is_a_no_op() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 13, 5, 9).unwrap();
        let mut record = sample(now);
        assert!(record.try_transition(EvaluationStatus::Provisioning, now));
        assert!(!record.try_transition(EvaluationStatus::Provisioning, now));
    }

    #[test]
    fn placeholder_starts_at_the_given_status_and_accepts_its_transitions() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 13, 5, 9).unwrap();
        let mut record = EvaluationRecord::new_placeholder("eval-1", EvaluationStatus::Provisioning, now);
        assert_eq!(record.status, EvaluationStatus::Provisioning);
        assert!(record.try_transition(EvaluationStatus::Running, now));
    }

    #[test]
    fn metadata_merge_overwrites_per_key_not_wholesale() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 13, 5, 9).unwrap();
        let mut record = sample(now);
        let mut extra = Map::new();
        extra.insert("retries".into(), Value::from(1));
        record.merge_metadata(extra);
        assert_eq!(record.metadata.get("retries"), Some(&Value::from(1)));
        // code_lines inserted at construction time must survive the merge.
        assert!(record.metadata.contains_key("code_lines"));
    }
}
