use async_trait::async_trait;
use eval_types::{EvaluationRecord, EvaluationStatus, EventRecord};

use crate::error::StoreError;

/// A durable record store: `Relational` (sqlx/Postgres), `File`, or
/// `Memory` (§9 Design Notes — "express as interface abstractions").
///
/// The façade ([`crate::Facade`]) composes two of these (primary,
/// secondary) plus an in-process cache per the routing policy in §4.5;
/// no single `Backend` implementation knows about fallback or caching.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Insert a brand-new record. Errors if `id` already exists.
    async fn create(&self, record: &EvaluationRecord) -> Result<(), StoreError>;

    /// Full upsert of an already-existing record (used by `Update`).
    async fn put(&self, record: &EvaluationRecord) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<EvaluationRecord>, StoreError>;

    /// Newest first, paginated, optionally filtered by status.
    async fn list(
        &self,
        limit: i64,
        offset: i64,
        status: Option<EvaluationStatus>,
    ) -> Result<Vec<EvaluationRecord>, StoreError>;

    async fn count(&self, status: Option<EvaluationStatus>) -> Result<i64, StoreError>;

    async fn add_event(&self, event: &EventRecord) -> Result<(), StoreError>;

    /// Ordered by timestamp, oldest first.
    async fn get_events(&self, id: &str) -> Result<Vec<EventRecord>, StoreError>;
}
