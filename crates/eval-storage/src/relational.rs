//! Postgres-backed [`Backend`] via `sqlx`, the façade's primary store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eval_types::{EvaluationRecord, EvaluationStatus, EventRecord};
use sqlx::PgPool;

use crate::backend::Backend;
use crate::error::StoreError;

pub struct RelationalBackend {
    pool: PgPool,
}

impl RelationalBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the evaluations/events table migrations embedded in this crate.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

/// Row shape matching the `evaluations` table; `status` and `metadata` are
/// stored as `TEXT`/`JSONB` and converted on the way in and out.
#[derive(sqlx::FromRow)]
struct EvaluationRow {
    id: String,
    code_hash: String,
    status: String,
    language: String,
    engine: String,
    created_at: DateTime<Utc>,
    queued_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    memory_limit: String,
    cpu_limit: String,
    timeout_seconds: i32,
    priority: i16,
    executor_image: Option<String>,
    exit_code: Option<i32>,
    runtime_ms: Option<i64>,
    output: Option<String>,
    output_truncated: bool,
    output_size: Option<i64>,
    output_location: Option<String>,
    error: Option<String>,
    error_truncated: bool,
    error_size: Option<i64>,
    error_location: Option<String>,
    metadata: serde_json::Value,
}

impl EvaluationRow {
    fn into_record(self) -> Result<EvaluationRecord, StoreError> {
        let status: EvaluationStatus = self
            .status
            .parse()
            .map_err(|e: eval_types::UnknownStatus| StoreError::Unavailable(e.to_string()))?;
        let metadata = self.metadata.as_object().cloned().unwrap_or_default();
        Ok(EvaluationRecord {
            id: self.id,
            code_hash: self.code_hash,
            status,
            language: self.language,
            engine: self.engine,
            created_at: self.created_at,
            queued_at: self.queued_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            memory_limit: self.memory_limit,
            cpu_limit: self.cpu_limit,
            timeout_seconds: self.timeout_seconds as u32,
            priority: self.priority as i8,
            executor_image: self.executor_image,
            exit_code: self.exit_code,
            runtime_ms: self.runtime_ms,
            output: self.output,
            output_truncated: self.output_truncated,
            output_size: self.output_size.map(|v| v as u64),
            output_location: self.output_location,
            error: self.error,
            error_truncated: self.error_truncated,
            error_size: self.error_size.map(|v| v as u64),
            error_location: self.error_location,
            metadata,
        })
    }
}

#[async_trait]
impl Backend for RelationalBackend {
    async fn create(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        self.put(record).await
    }

    async fn put(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO evaluations (
                id, code_hash, status, language, engine,
                created_at, queued_at, started_at, completed_at,
                memory_limit, cpu_limit, timeout_seconds, priority, executor_image,
                exit_code, runtime_ms,
                output, output_truncated, output_size, output_location,
                error, error_truncated, error_size, error_location,
                metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                queued_at = EXCLUDED.queued_at,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                exit_code = EXCLUDED.exit_code,
                runtime_ms = EXCLUDED.runtime_ms,
                output = EXCLUDED.output,
                output_truncated = EXCLUDED.output_truncated,
                output_size = EXCLUDED.output_size,
                output_location = EXCLUDED.output_location,
                error = EXCLUDED.error,
                error_truncated = EXCLUDED.error_truncated,
                error_size = EXCLUDED.error_size,
                error_location = EXCLUDED.error_location,
                metadata = EXCLUDED.metadata
            "#,
        )
        .bind(&record.id)
        .bind(&record.code_hash)
        .bind(record.status.as_str())
        .bind(&record.language)
        .bind(&record.engine)
        .bind(record.created_at)
        .bind(record.queued_at)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(&record.memory_limit)
        .bind(&record.cpu_limit)
        .bind(record.timeout_seconds as i32)
        .bind(record.priority as i16)
        .bind(&record.executor_image)
        .bind(record.exit_code)
        .bind(record.runtime_ms)
        .bind(&record.output)
        .bind(record.output_truncated)
        .bind(record.output_size.map(|v| v as i64))
        .bind(&record.output_location)
        .bind(&record.error)
        .bind(record.error_truncated)
        .bind(record.error_size.map(|v| v as i64))
        .bind(&record.error_location)
        .bind(serde_json::Value::Object(record.metadata.clone()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<EvaluationRecord>, StoreError> {
        let row = sqlx::query_as::<_, EvaluationRow>("SELECT * FROM evaluations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        row.map(EvaluationRow::into_record).transpose()
    }

    async fn list(
        &self,
        limit: i64,
        offset: i64,
        status: Option<EvaluationStatus>,
    ) -> Result<Vec<EvaluationRecord>, StoreError> {
        let rows = if let Some(status) = status {
            sqlx::query_as::<_, EvaluationRow>(
                "SELECT * FROM evaluations WHERE status = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(status.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, EvaluationRow>(
                "SELECT * FROM evaluations ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        rows.into_iter().map(EvaluationRow::into_record).collect()
    }

    async fn count(&self, status: Option<EvaluationStatus>) -> Result<i64, StoreError> {
        let count: i64 = if let Some(status) = status {
            sqlx::query_scalar("SELECT COUNT(*) FROM evaluations WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
        } else {
            sqlx::query_scalar("SELECT COUNT(*) FROM evaluations").fetch_one(&self.pool).await
        }
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(count)
    }

    async fn add_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO evaluation_events (evaluation_id, event_type, timestamp, message, metadata) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&event.evaluation_id)
        .bind(&event.event_type)
        .bind(event.timestamp)
        .bind(&event.message)
        .bind(serde_json::Value::Object(event.metadata.clone()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_events(&self, id: &str) -> Result<Vec<EventRecord>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, DateTime<Utc>, String, serde_json::Value)>(
            "SELECT evaluation_id, event_type, timestamp, message, metadata \
             FROM evaluation_events WHERE evaluation_id = $1 ORDER BY timestamp ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(evaluation_id, event_type, timestamp, message, metadata)| EventRecord {
                evaluation_id,
                event_type,
                timestamp,
                message,
                metadata: metadata.as_object().cloned().unwrap_or_default(),
            })
            .collect())
    }
}
