use std::sync::Arc;

use chrono::{DateTime, Utc};
use eval_types::{EvaluationRecord, EvaluationStatus, EventRecord, NewEvaluation};
use serde_json::{Map, Value};
use tracing::warn;

use crate::backend::Backend;
use crate::cache::Cache;
use crate::error::StoreError;
use crate::object_store::{externalized_key, ObjectStore};
use crate::patch::UpdatePatch;

/// Default externalization thresholds (§4.5), re-exported here so callers
/// that only depend on `eval-storage` don't also need `eval-types`.
pub use eval_types::{INLINE_THRESHOLD, PREVIEW_SIZE};

/// The persistence façade (C5): composes a primary backend, a secondary
/// fallback backend, an in-process cache, and an overflow object store,
/// per the routing policy in §4.5.
///
/// Writes go to the primary; on primary failure the façade falls back to
/// the secondary. Reads consult the cache first, then primary, then
/// secondary on primary error. Every write refreshes the cache with the
/// full post-write record.
pub struct Facade {
    primary: Arc<dyn Backend>,
    secondary: Arc<dyn Backend>,
    cache: Cache,
    object_store: Arc<dyn ObjectStore>,
}

impl Facade {
    pub fn new(
        primary: Arc<dyn Backend>,
        secondary: Arc<dyn Backend>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            primary,
            secondary,
            cache: Cache::new(),
            object_store,
        }
    }

    /// Create the initial record for a freshly-submitted evaluation
    /// (`status = queued`). Does not add the `submitted` lifecycle event;
    /// callers do that separately via [`Facade::add_event`] (§4.1).
    pub async fn create(
        &self,
        new: NewEvaluation,
        now: DateTime<Utc>,
    ) -> Result<EvaluationRecord, StoreError> {
        let record = EvaluationRecord::new_queued(new, now);
        self.write_through(&record).await?;
        self.cache.put(record.clone());
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Result<Option<EvaluationRecord>, StoreError> {
        if let Some(record) = self.cache.get(id) {
            return Ok(Some(record));
        }
        let record = match self.primary.get(id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, id, "primary store read failed, falling back to secondary");
                self.secondary.get(id).await?
            }
        };
        if let Some(record) = &record {
            self.cache.put(record.clone());
        }
        Ok(record)
    }

    /// Fetch the evaluation, or materialize a placeholder at `default_status`
    /// if the façade has no record for it yet (§4.4 step 1: a lifecycle
    /// event may arrive before the Gateway's own write is visible, or after
    /// an at-least-once redelivery outlives the record's cache entry).
    pub async fn get_or_create(
        &self,
        id: &str,
        default_status: EvaluationStatus,
        now: DateTime<Utc>,
    ) -> Result<EvaluationRecord, StoreError> {
        if let Some(record) = self.get(id).await? {
            return Ok(record);
        }
        let record = EvaluationRecord::new_placeholder(id, default_status, now);
        self.write_through(&record).await?;
        self.cache.put(record.clone());
        Ok(record)
    }

    pub async fn list(
        &self,
        limit: i64,
        offset: i64,
        status: Option<EvaluationStatus>,
    ) -> Result<Vec<EvaluationRecord>, StoreError> {
        match self.primary.list(limit, offset, status).await {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(error = %e, "primary store list failed, falling back to secondary");
                self.secondary.list(limit, offset, status).await
            }
        }
    }

    pub async fn count(&self, status: Option<EvaluationStatus>) -> Result<i64, StoreError> {
        match self.primary.count(status).await {
            Ok(count) => Ok(count),
            Err(e) => {
                warn!(error = %e, "primary store count failed, falling back to secondary");
                self.secondary.count(status).await
            }
        }
    }

    /// Soft-delete: the record's `metadata.deleted` flag is set rather
    /// than the row being removed or `status` being overloaded with a
    /// sentinel the state machine doesn't otherwise recognize (§3
    /// "Lifecycles").
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let Some(mut record) = self.get(id).await? else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        let mut flag = Map::new();
        flag.insert("deleted".into(), Value::from(true));
        record.merge_metadata(flag);
        self.write_through(&record).await?;
        self.cache.put(record);
        Ok(())
    }

    /// Apply a partial update (§4.5 `Update`), externalizing `output`/
    /// `error` overflow as needed. Returns the fully updated record.
    pub async fn update(
        &self,
        id: &str,
        patch: UpdatePatch,
        now: DateTime<Utc>,
    ) -> Result<EvaluationRecord, StoreError> {
        let mut record = self
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if let Some(status) = patch.status {
            record.try_transition(status, now);
        }
        if let Some(started_at) = patch.started_at {
            if record.started_at.is_none() {
                record.started_at = Some(started_at);
            }
        }
        if let Some(exit_code) = patch.exit_code {
            record.exit_code = Some(exit_code);
        }
        if let Some(runtime_ms) = patch.runtime_ms {
            record.runtime_ms = Some(runtime_ms);
        }
        if let Some(metadata) = patch.metadata {
            record.merge_metadata(metadata);
        }
        if let Some(output) = patch.output {
            self.externalize_field(id, "output", output, &mut record).await?;
        }
        if let Some(error) = patch.error {
            self.externalize_field(id, "error", error, &mut record).await?;
        }

        self.write_through(&record).await?;
        self.cache.put(record.clone());
        Ok(record)
    }

    pub async fn add_event(
        &self,
        id: &str,
        event_type: impl Into<String>,
        message: impl Into<String>,
        metadata: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let event = EventRecord::new(id, event_type, message, now).with_metadata(metadata);
        match self.primary.add_event(&event).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, id, "primary store add_event failed, falling back to secondary");
                self.secondary.add_event(&event).await
            }
        }
    }

    pub async fn get_events(&self, id: &str) -> Result<Vec<EventRecord>, StoreError> {
        match self.primary.get_events(id).await {
            Ok(events) => Ok(events),
            Err(e) => {
                warn!(error = %e, id, "primary store get_events failed, falling back to secondary");
                self.secondary.get_events(id).await
            }
        }
    }

    /// Fetch the complete bytes of a previously-externalized field; `Get`
    /// only ever returns the inline preview (§4.5).
    pub async fn get_full_field(
        &self,
        id: &str,
        field: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.object_store.get(&externalized_key(id, field)).await
    }

    async fn write_through(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        if let Err(e) = self.primary.put(record).await {
            warn!(error = %e, id = %record.id, "primary store write failed, falling back to secondary");
            self.secondary.put(record).await?;
        }
        Ok(())
    }

    async fn externalize_field(
        &self,
        id: &str,
        field: &str,
        full_text: String,
        record: &mut EvaluationRecord,
    ) -> Result<(), StoreError> {
        let full_len = full_text.len() as u64;
        let (inline, truncated, size, location) = if full_len > INLINE_THRESHOLD {
            let preview = safe_prefix(&full_text, PREVIEW_SIZE);
            let key = externalized_key(id, field);
            self.object_store.put(&key, full_text.into_bytes()).await?;
            (Some(preview), true, Some(full_len), Some(key))
        } else {
            (Some(full_text), false, None, None)
        };

        match field {
            "output" => {
                record.output = inline;
                record.output_truncated = truncated;
                record.output_size = size;
                record.output_location = location;
            }
            "error" => {
                record.error = inline;
                record.error_truncated = truncated;
                record.error_size = size;
                record.error_location = location;
            }
            other => unreachable!("unexpected externalizable field: {other}"),
        }
        Ok(())
    }
}

/// The longest prefix of `s` whose byte length is `<= max_bytes`, cut at a
/// char boundary so UTF-8 output is never split mid-codepoint.
fn safe_prefix(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut idx = max_bytes;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    s[..idx].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::object_store::InMemoryObjectStore;

    fn facade() -> Facade {
        Facade::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
            Arc::new(InMemoryObjectStore::new()),
        )
    }

    fn new_eval(id: &str) -> NewEvaluation {
        NewEvaluation {
            id: id.to_string(),
            code: "print('hi')".into(),
            language: "python".into(),
            engine: "cpython".into(),
            memory_limit: "512Mi".into(),
            cpu_limit: "500m".into(),
            timeout_seconds: 30,
            priority: 0,
            executor_image: None,
        }
    }

    #[tokio::test]
    async fn create_then_get_is_served_from_cache() {
        let facade = facade();
        let now = Utc::now();
        facade.create(new_eval("eval-1"), now).await.unwrap();

        let fetched = facade.get("eval-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, EvaluationStatus::Queued);
    }

    #[tokio::test]
    async fn update_is_monotonic_once_terminal() {
        let facade = facade();
        let now = Utc::now();
        facade.create(new_eval("eval-1"), now).await.unwrap();

        facade
            .update("eval-1", UpdatePatch::status(EvaluationStatus::Provisioning), now)
            .await
            .unwrap();
        facade
            .update("eval-1", UpdatePatch::status(EvaluationStatus::Running), now)
            .await
            .unwrap();
        let completed = facade
            .update(
                "eval-1",
                UpdatePatch::status(EvaluationStatus::Completed).with_exit_code(0),
                now,
            )
            .await
            .unwrap();
        assert_eq!(completed.status, EvaluationStatus::Completed);

        // A terminal record's status cannot move again.
        let after = facade
            .update("eval-1", UpdatePatch::status(EvaluationStatus::Failed), now)
            .await
            .unwrap();
        assert_eq!(after.status, EvaluationStatus::Completed);
    }

    #[tokio::test]
    async fn metadata_merges_instead_of_replacing() {
        let facade = facade();
        let now = Utc::now();
        facade.create(new_eval("eval-1"), now).await.unwrap();

        let mut first = Map::new();
        first.insert("retries".into(), Value::from(1));
        facade
            .update("eval-1", UpdatePatch::default().with_metadata(first), now)
            .await
            .unwrap();

        let mut second = Map::new();
        second.insert("retry_message".into(), Value::from("backing off"));
        let record = facade
            .update("eval-1", UpdatePatch::default().with_metadata(second), now)
            .await
            .unwrap();

        assert_eq!(record.metadata.get("retries"), Some(&Value::from(1)));
        assert_eq!(
            record.metadata.get("retry_message"),
            Some(&Value::from("backing off"))
        );
        // code_lines set at creation time must still be present.
        assert!(record.metadata.contains_key("code_lines"));
    }

    #[tokio::test]
    async fn large_output_is_externalized_with_a_retrievable_preview() {
        let facade = facade();
        let now = Utc::now();
        facade.create(new_eval("eval-1"), now).await.unwrap();

        let full = "x".repeat((INLINE_THRESHOLD as usize) * 2);
        let record = facade
            .update(
                "eval-1",
                UpdatePatch::status(EvaluationStatus::Completed).with_output(full.clone()),
                now,
            )
            .await
            .unwrap();

        assert!(record.output_truncated);
        assert_eq!(record.output_size, Some(full.len() as u64));
        assert_eq!(record.output.as_ref().unwrap().len(), PREVIEW_SIZE);

        let retrieved = facade
            .get_full_field("eval-1", "output")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retrieved.len(), full.len());
        assert_eq!(&retrieved[..PREVIEW_SIZE], record.output.as_ref().unwrap().as_bytes());
    }

    #[tokio::test]
    async fn small_output_is_stored_inline_without_externalization() {
        let facade = facade();
        let now = Utc::now();
        facade.create(new_eval("eval-1"), now).await.unwrap();

        let record = facade
            .update(
                "eval-1",
                UpdatePatch::status(EvaluationStatus::Completed).with_output("hello".into()),
                now,
            )
            .await
            .unwrap();

        assert!(!record.output_truncated);
        assert_eq!(record.output.as_deref(), Some("hello"));
        assert_eq!(record.output_location, None);
    }

    #[tokio::test]
    async fn delete_soft_deletes_via_metadata_flag() {
        let facade = facade();
        let now = Utc::now();
        facade.create(new_eval("eval-1"), now).await.unwrap();
        facade.delete("eval-1").await.unwrap();

        let record = facade.get("eval-1").await.unwrap().unwrap();
        assert_eq!(record.metadata.get("deleted"), Some(&Value::from(true)));
        // The record still exists and its status machine is untouched.
        assert_eq!(record.status, EvaluationStatus::Queued);
    }
}
