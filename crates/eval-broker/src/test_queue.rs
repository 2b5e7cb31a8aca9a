//! In-memory [`WorkQueue`] double for unit tests, mirroring the
//! recording-mock pattern used for `Bus`/`Nats` elsewhere in this codebase.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::queue::{Reservation, WorkQueue};
use crate::work_item::WorkItem;

#[derive(Default)]
struct State {
    ready: VecDeque<String>,
    processing: Vec<String>,
    delayed: Vec<String>,
    dead_lettered: Vec<WorkItem>,
}

/// A test double for [`WorkQueue`] that never blocks and holds everything
/// in memory. `nack_with_delay` enqueues the item immediately rather than
/// waiting out the delay; tests that care about timing assert on the
/// recorded delay separately if needed.
#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready_len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).ready.len()
    }

    pub fn dead_lettered(&self) -> Vec<WorkItem> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .dead_lettered
            .clone()
    }
}

#[async_trait]
impl WorkQueue for InMemoryBroker {
    async fn enqueue(&self, item: WorkItem) -> Result<(), BrokerError> {
        let raw = serde_json::to_string(&item)?;
        self.state.lock().unwrap_or_else(|e| e.into_inner()).ready.push_back(raw);
        Ok(())
    }

    async fn reserve(&self, _wait: Duration) -> Result<Option<Reservation>, BrokerError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        // Promote anything parked by a prior nack before popping.
        let delayed: Vec<String> = state.delayed.drain(..).collect();
        for raw in delayed {
            state.ready.push_back(raw);
        }
        let Some(raw) = state.ready.pop_front() else {
            return Ok(None);
        };
        state.processing.push(raw.clone());
        let item: WorkItem = serde_json::from_str(&raw)?;
        Ok(Some(Reservation { item, raw }))
    }

    async fn ack(&self, reservation: &Reservation) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.processing.retain(|r| r != &reservation.raw);
        Ok(())
    }

    async fn nack_with_delay(
        &self,
        reservation: Reservation,
        _delay: Duration,
    ) -> Result<(), BrokerError> {
        let updated_raw = serde_json::to_string(&reservation.item)?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.processing.retain(|r| r != &reservation.raw);
        state.delayed.push(updated_raw);
        Ok(())
    }

    async fn dead_letter(&self, reservation: Reservation) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.processing.retain(|r| r != &reservation.raw);
        state.dead_lettered.push(reservation.item);
        Ok(())
    }

    async fn depth(&self) -> Result<usize, BrokerError> {
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).ready.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> WorkItem {
        WorkItem {
            eval_id: "20260728_130509_deadbeef".into(),
            code: "print('hi')".into(),
            language: "python".into(),
            engine: "cpython".into(),
            timeout: 30,
            memory_limit: "512Mi".into(),
            cpu_limit: "500m".into(),
            priority: 0,
            executor_image: None,
            retries: 0,
        }
    }

    #[tokio::test]
    async fn enqueue_then_reserve_round_trips() {
        let broker = InMemoryBroker::new();
        broker.enqueue(sample_item()).await.unwrap();
        assert_eq!(broker.ready_len(), 1);

        let reservation = broker.reserve(Duration::from_secs(0)).await.unwrap().unwrap();
        assert_eq!(reservation.item.eval_id, "20260728_130509_deadbeef");
        assert_eq!(broker.ready_len(), 0);
    }

    #[tokio::test]
    async fn ack_removes_from_processing_permanently() {
        let broker = InMemoryBroker::new();
        broker.enqueue(sample_item()).await.unwrap();
        let reservation = broker.reserve(Duration::from_secs(0)).await.unwrap().unwrap();
        broker.ack(&reservation).await.unwrap();

        // Nothing left to reserve.
        assert!(broker.reserve(Duration::from_secs(0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nack_with_delay_requeues_with_mutated_retry_count() {
        let broker = InMemoryBroker::new();
        broker.enqueue(sample_item()).await.unwrap();
        let mut reservation = broker.reserve(Duration::from_secs(0)).await.unwrap().unwrap();
        reservation.item.retries += 1;
        broker
            .nack_with_delay(reservation, Duration::from_secs(1))
            .await
            .unwrap();

        let redelivered = broker.reserve(Duration::from_secs(0)).await.unwrap().unwrap();
        assert_eq!(redelivered.item.retries, 1);
    }

    #[tokio::test]
    async fn dead_letter_drops_the_item_and_records_it() {
        let broker = InMemoryBroker::new();
        broker.enqueue(sample_item()).await.unwrap();
        let reservation = broker.reserve(Duration::from_secs(0)).await.unwrap().unwrap();
        broker.dead_letter(reservation).await.unwrap();

        assert!(broker.reserve(Duration::from_secs(0)).await.unwrap().is_none());
        assert_eq!(broker.dead_lettered().len(), 1);
    }
}
