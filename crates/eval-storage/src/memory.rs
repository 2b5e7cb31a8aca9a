//! In-memory [`Backend`], used as the façade's `Memory` variant and as a
//! cheap secondary/test-double backend (mirroring `eval-bus`'s
//! `InMemoryBus`).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use eval_types::{EvaluationRecord, EvaluationStatus, EventRecord};

use crate::backend::Backend;
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<String, EvaluationRecord>>,
    events: RwLock<HashMap<String, Vec<EventRecord>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn create(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn put(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<EvaluationRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    async fn list(
        &self,
        limit: i64,
        offset: i64,
        status: Option<EvaluationStatus>,
    ) -> Result<Vec<EvaluationRecord>, StoreError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<EvaluationRecord> = records
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, status: Option<EvaluationStatus>) -> Result<i64, StoreError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .count() as i64)
    }

    async fn add_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event.evaluation_id.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn get_events(&self, id: &str) -> Result<Vec<EventRecord>, StoreError> {
        let mut events = self
            .events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .unwrap_or_default();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use eval_types::NewEvaluation;

    fn sample(id: &str) -> EvaluationRecord {
        EvaluationRecord::new_queued(
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
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let backend = MemoryBackend::new();
        let record = sample("eval-1");
        backend.create(&record).await.unwrap();
        let fetched = backend.get("eval-1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "eval-1");
    }

    #[tokio::test]
    async fn list_is_newest_first_and_status_filtered() {
        let backend = MemoryBackend::new();
        let mut a = sample("eval-a");
        a.created_at = Utc::now() - chrono::Duration::seconds(10);
        let b = sample("eval-b");
        backend.create(&a).await.unwrap();
        backend.create(&b).await.unwrap();

        let all = backend.list(10, 0, None).await.unwrap();
        assert_eq!(all[0].id, "eval-b");

        let filtered = backend
            .list(10, 0, Some(EvaluationStatus::Queued))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 2);
    }

    #[tokio::test]
    async fn events_are_ordered_by_timestamp() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        backend
            .add_event(&EventRecord::new("eval-1", "queued", "queued", now))
            .await
            .unwrap();
        backend
            .add_event(&EventRecord::new(
                "eval-1",
                "running",
                "running",
                now + chrono::Duration::seconds(1),
            ))
            .await
            .unwrap();

        let events = backend.get_events("eval-1").await.unwrap();
        assert_eq!(events[0].event_type, "queued");
        assert_eq!(events[1].event_type, "running");
    }
}
