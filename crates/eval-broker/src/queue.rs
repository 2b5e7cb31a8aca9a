use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::work_item::WorkItem;

/// An in-flight work item leased from the queue. The broker keeps the raw
/// delivery alive (invisible to other consumers) until `ack` or
/// `nack_with_delay`/`dead_letter` resolves it.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub item: WorkItem,
    pub(crate) raw: String,
}

/// At-least-once work queue connecting the Gateway (producer) to the Worker
/// pool (consumers). A single reservation is visible to exactly one
/// consumer at a time; the broker enforces that visibility until the
/// consumer acks, nacks, or dead-letters it (§5).
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue a new work item, keyed by `eval_id`.
    async fn enqueue(&self, item: WorkItem) -> Result<(), BrokerError>;

    /// Reserve the next ready item, blocking up to `wait` for one to
    /// arrive. Returns `None` on timeout with nothing available.
    async fn reserve(&self, wait: Duration) -> Result<Option<Reservation>, BrokerError>;

    /// Acknowledge successful processing; the item is permanently removed.
    async fn ack(&self, reservation: &Reservation) -> Result<(), BrokerError>;

    /// Return the item to the queue after `delay`, with its `retries`
    /// counter as mutated by the caller (the Worker increments it before
    /// calling this).
    async fn nack_with_delay(
        &self,
        reservation: Reservation,
        delay: Duration,
    ) -> Result<(), BrokerError>;

    /// Remove the item from the queue permanently without re-enqueueing
    /// it; the caller is responsible for pushing a DLQ entry onto the bus.
    async fn dead_letter(&self, reservation: Reservation) -> Result<(), BrokerError>;

    /// Number of items currently ready (not counting in-flight or delayed
    /// reservations); used for queue-status aggregation.
    async fn depth(&self) -> Result<usize, BrokerError>;
}
