//! File-backed [`Backend`]: one JSON document per record under
//! `<base_dir>/records/<id>.json`, one JSON array of events per record
//! under `<base_dir>/events/<id>.json`. Used as a lightweight secondary
//! store (no separate database process required).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use eval_types::{EvaluationRecord, EvaluationStatus, EventRecord};
use tokio::fs;

use crate::backend::Backend;
use crate::error::StoreError;

pub struct FileBackend {
    base_dir: PathBuf,
}

impl FileBackend {
    pub async fn open(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(base_dir.join("records")).await?;
        fs::create_dir_all(base_dir.join("events")).await?;
        Ok(Self { base_dir })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.base_dir.join("records").join(format!("{id}.json"))
    }

    fn events_path(&self, id: &str) -> PathBuf {
        self.base_dir.join("events").join(format!("{id}.json"))
    }

    async fn write_record(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        let serialized = serde_json::to_vec_pretty(record)?;
        fs::write(self.record_path(&record.id), serialized).await?;
        Ok(())
    }

    async fn all_records(&self) -> Result<Vec<EvaluationRecord>, StoreError> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(self.base_dir.join("records")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let bytes = fs::read(entry.path()).await?;
            records.push(serde_json::from_slice(&bytes)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn create(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        self.write_record(record).await
    }

    async fn put(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        self.write_record(record).await
    }

    async fn get(&self, id: &str) -> Result<Option<EvaluationRecord>, StoreError> {
        match fs::read(self.record_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        limit: i64,
        offset: i64,
        status: Option<EvaluationStatus>,
    ) -> Result<Vec<EvaluationRecord>, StoreError> {
        let mut records = self.all_records().await?;
        records.retain(|r| status.map_or(true, |s| r.status == s));
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, status: Option<EvaluationStatus>) -> Result<i64, StoreError> {
        let records = self.all_records().await?;
        Ok(records
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .count() as i64)
    }

    async fn add_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        let mut events = match fs::read(self.events_path(&event.evaluation_id)).await {
            Ok(bytes) => serde_json::from_slice::<Vec<EventRecord>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        events.push(event.clone());
        let serialized = serde_json::to_vec_pretty(&events)?;
        fs::write(self.events_path(&event.evaluation_id), serialized).await?;
        Ok(())
    }

    async fn get_events(&self, id: &str) -> Result<Vec<EventRecord>, StoreError> {
        match fs::read(self.events_path(id)).await {
            Ok(bytes) => {
                let mut events: Vec<EventRecord> = serde_json::from_slice(&bytes)?;
                events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
                Ok(events)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
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
    async fn create_then_get_round_trips_through_disk() {
        let dir = tempdir();
        let backend = FileBackend::open(&dir).await.unwrap();
        let record = sample("eval-1");
        backend.create(&record).await.unwrap();

        let fetched = backend.get("eval-1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "eval-1");
        assert_eq!(backend.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn events_accumulate_and_stay_ordered() {
        let dir = tempdir();
        let backend = FileBackend::open(&dir).await.unwrap();
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
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "queued");
    }

    fn tempdir() -> PathBuf {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "eval-storage-test-{}-{n}",
            std::process::id()
        ))
    }
}
