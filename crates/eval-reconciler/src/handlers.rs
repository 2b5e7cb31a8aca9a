//! Lifecycle-event reduction (§4.4): each handler maps one channel's wire
//! payload onto a transition against the durable record, then (for
//! terminal events) cleans up the bus-scoped ephemeral state the Worker
//! and Dispatcher leave behind.
//!
//! Every handler is idempotent: a duplicate or out-of-order delivery for
//! an evaluation already in (or past) the target state is a no-op, which
//! is what makes at-least-once bus delivery safe to reduce here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use eval_bus::Bus;
use eval_storage::{Facade, UpdatePatch};
use eval_types::EvaluationStatus;
use serde::Deserialize;
use serde_json::{Map, Value};

const RUNNING_SET_KEY: &str = "running_evaluations";

pub struct Reconciler {
    pub facade: Arc<Facade>,
    pub bus: Arc<dyn Bus>,
}

impl Reconciler {
    pub async fn handle(&self, channel: &str, payload: &[u8]) {
        let result = match channel {
            "evaluation:queued" => self.handle_queued(payload).await,
            "evaluation:running" => self.handle_running(payload).await,
            "evaluation:completed" => self.handle_completed(payload).await,
            "evaluation:failed" => self.handle_failed(payload).await,
            "evaluation:cancelled" => self.handle_cancelled(payload).await,
            other => {
                tracing::warn!(channel = other, "event on unrecognized channel, ignoring");
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!(channel, error = %e, "failed to reconcile lifecycle event");
        }
    }

    /// Nothing currently publishes here — the Gateway writes `status =
    /// queued` directly at submission time — but the subscription stays
    /// live, and a redelivery that outruns the Gateway's own write still
    /// materializes the record rather than being dropped (§4.4 step 1).
    async fn handle_queued(&self, payload: &[u8]) -> anyhow::Result<()> {
        let event: QueuedEvent = serde_json::from_slice(payload)?;
        self.facade
            .get_or_create(&event.eval_id, EvaluationStatus::Queued, Utc::now())
            .await?;
        Ok(())
    }

    async fn handle_running(&self, payload: &[u8]) -> anyhow::Result<()> {
        let event: RunningEvent = serde_json::from_slice(payload)?;
        let record = self
            .facade
            .get_or_create(&event.eval_id, EvaluationStatus::Provisioning, Utc::now())
            .await?;
        if record.is_terminal() {
            return Ok(());
        }

        let mut metadata = Map::new();
        metadata.insert("executor_id".into(), Value::from(event.executor_id));
        metadata.insert("container_id".into(), Value::from(event.container_id));
        metadata.insert("timeout".into(), Value::from(event.timeout));

        let patch = UpdatePatch::status(EvaluationStatus::Running)
            .with_started_at(event.started_at)
            .with_metadata(metadata);

        self.facade.update(&event.eval_id, patch, Utc::now()).await?;
        self.facade
            .add_event(&event.eval_id, "running", "evaluation started executing", Map::new(), Utc::now())
            .await?;
        self.bus.set_add(RUNNING_SET_KEY, &event.eval_id).await?;
        Ok(())
    }

    async fn handle_completed(&self, payload: &[u8]) -> anyhow::Result<()> {
        let event: CompletedEvent = serde_json::from_slice(payload)?;
        let patch = UpdatePatch::status(EvaluationStatus::Completed)
            .with_output(event.output)
            .with_exit_code(event.exit_code);
        self.finish_terminal(
            &event.eval_id,
            &event.metadata.job_name,
            event.metadata.completed_at,
            patch,
            "completed",
            "evaluation completed successfully",
        )
        .await
    }

    async fn handle_failed(&self, payload: &[u8]) -> anyhow::Result<()> {
        let event: FailedEvent = serde_json::from_slice(payload)?;
        let patch = UpdatePatch::status(EvaluationStatus::Failed)
            .with_error(event.error)
            .with_exit_code(event.exit_code);
        self.finish_terminal(
            &event.eval_id,
            &event.metadata.job_name,
            event.metadata.failed_at,
            patch,
            "failed",
            "evaluation failed",
        )
        .await
    }

    async fn handle_cancelled(&self, payload: &[u8]) -> anyhow::Result<()> {
        let event: CancelledEvent = serde_json::from_slice(payload)?;
        let mut metadata = Map::new();
        metadata.insert("cancel_reason".into(), Value::from(event.reason));
        let patch = UpdatePatch::status(EvaluationStatus::Cancelled).with_metadata(metadata);
        self.finish_terminal(
            &event.eval_id,
            &event.job_name,
            event.cancelled_at,
            patch,
            "cancelled",
            "evaluation cancelled",
        )
        .await
    }

    /// Shared terminal-event path (§4.4 steps 2-3): materialize the record
    /// if this is the first event the Reconciler has seen for it (§4.4 step
    /// 1), no-op if already terminal, otherwise compute `runtime_ms`, apply
    /// the patch, append the lifecycle event, and drop the evaluation's
    /// ephemeral bus state.
    async fn finish_terminal(
        &self,
        eval_id: &str,
        job_name: &str,
        completed_at: DateTime<Utc>,
        mut patch: UpdatePatch,
        event_type: &str,
        message: &str,
    ) -> anyhow::Result<()> {
        let record = self
            .facade
            .get_or_create(eval_id, EvaluationStatus::Running, completed_at)
            .await?;
        if record.is_terminal() {
            return Ok(());
        }
        if let Some(started_at) = record.started_at {
            let runtime_ms = (completed_at - started_at).num_milliseconds().max(0);
            patch = patch.with_runtime_ms(runtime_ms);
        }

        self.facade.update(eval_id, patch, completed_at).await?;
        self.facade
            .add_event(eval_id, event_type, message, Map::new(), completed_at)
            .await?;

        if let Err(e) = self.bus.delete(&format!("eval:{eval_id}:running")).await {
            tracing::warn!(error = %e, eval_id, "failed to clear running hash");
        }
        if let Err(e) = self.bus.delete(&format!("job:{job_name}:last_state")).await {
            tracing::warn!(error = %e, job_name, "failed to clear job last-state");
        }
        if let Err(e) = self.bus.set_remove(RUNNING_SET_KEY, eval_id).await {
            tracing::warn!(error = %e, eval_id, "failed to remove from running set");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct QueuedEvent {
    eval_id: String,
}

#[derive(Debug, Deserialize)]
struct RunningEvent {
    eval_id: String,
    executor_id: String,
    container_id: String,
    timeout: i64,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CompletedMetadata {
    job_name: String,
    completed_at: DateTime<Utc>,
    #[allow(dead_code)]
    log_source: String,
}

#[derive(Debug, Deserialize)]
struct CompletedEvent {
    eval_id: String,
    output: String,
    exit_code: i32,
    metadata: CompletedMetadata,
}

#[derive(Debug, Deserialize)]
struct FailedMetadata {
    job_name: String,
    failed_at: DateTime<Utc>,
    #[allow(dead_code)]
    log_source: String,
}

#[derive(Debug, Deserialize)]
struct FailedEvent {
    eval_id: String,
    error: String,
    exit_code: i32,
    metadata: FailedMetadata,
}

#[derive(Debug, Deserialize)]
struct CancelledEvent {
    eval_id: String,
    job_name: String,
    cancelled_at: DateTime<Utc>,
    reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use eval_bus::InMemoryBus;
    use eval_storage::{InMemoryObjectStore, MemoryBackend};
    use eval_types::NewEvaluation;
    use serde_json::json;

    async fn reconciler() -> Reconciler {
        Reconciler {
            facade: Arc::new(Facade::new(
                Arc::new(MemoryBackend::new()),
                Arc::new(MemoryBackend::new()),
                Arc::new(InMemoryObjectStore::new()),
            )),
            bus: Arc::new(InMemoryBus::new()),
        }
    }

    async fn seed(reconciler: &Reconciler, id: &str) {
        reconciler
            .facade
            .create(
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
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn running_event_transitions_and_marks_started() {
        let r = reconciler().await;
        seed(&r, "eval-1").await;

        let started_at = Utc::now();
        let payload = json!({
            "eval_id": "eval-1",
            "executor_id": "job-eval-1",
            "container_id": "job-eval-1",
            "timeout": 300,
            "started_at": started_at.to_rfc3339(),
        });
        r.handle_running(&serde_json::to_vec(&payload).unwrap())
            .await
            .unwrap();

        let record = r.facade.get("eval-1").await.unwrap().unwrap();
        assert_eq!(record.status, EvaluationStatus::Running);
        assert!(record.started_at.is_some());
        assert!(r.bus.set_contains(RUNNING_SET_KEY, "eval-1").await.unwrap());
    }

    #[tokio::test]
    async fn completed_event_is_terminal_and_computes_runtime() {
        let r = reconciler().await;
        seed(&r, "eval-1").await;

        let started_at = Utc::now();
        let running = json!({
            "eval_id": "eval-1",
            "executor_id": "job-eval-1",
            "container_id": "job-eval-1",
            "timeout": 300,
            "started_at": started_at.to_rfc3339(),
        });
        r.handle_running(&serde_json::to_vec(&running).unwrap())
            .await
            .unwrap();

        let completed_at = started_at + chrono::Duration::seconds(2);
        let completed = json!({
            "eval_id": "eval-1",
            "output": "hello\n",
            "exit_code": 0,
            "metadata": {
                "job_name": "job-eval-1",
                "completed_at": completed_at.to_rfc3339(),
                "log_source": "cluster",
            },
        });
        r.handle_completed(&serde_json::to_vec(&completed).unwrap())
            .await
            .unwrap();

        let record = r.facade.get("eval-1").await.unwrap().unwrap();
        assert_eq!(record.status, EvaluationStatus::Completed);
        assert_eq!(record.output.as_deref(), Some("hello\n"));
        assert_eq!(record.runtime_ms, Some(2000));
        assert!(!r.bus.set_contains(RUNNING_SET_KEY, "eval-1").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_terminal_event_is_a_no_op() {
        let r = reconciler().await;
        seed(&r, "eval-1").await;

        let failed = json!({
            "eval_id": "eval-1",
            "error": "boom",
            "exit_code": 1,
            "metadata": {
                "job_name": "job-eval-1",
                "failed_at": Utc::now().to_rfc3339(),
                "log_source": "cluster",
            },
        });
        let bytes = serde_json::to_vec(&failed).unwrap();
        r.handle_failed(&bytes).await.unwrap();
        let first = r.facade.get("eval-1").await.unwrap().unwrap();

        // A second delivery of the same event must not move the record
        // again or append a second lifecycle event.
        r.handle_failed(&bytes).await.unwrap();
        let second = r.facade.get("eval-1").await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(r.facade.get_events("eval-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_event_on_unknown_evaluation_materializes_it_as_cancelled() {
        let r = reconciler().await;
        let cancelled = json!({
            "eval_id": "does-not-exist",
            "job_name": "job-ghost",
            "cancelled_at": Utc::now().to_rfc3339(),
            "reason": "job deleted",
        });
        r.handle_cancelled(&serde_json::to_vec(&cancelled).unwrap())
            .await
            .unwrap();

        // §4.4 step 1: a lifecycle event for an id the Reconciler hasn't
        // seen yet creates the record instead of dropping the event.
        let record = r.facade.get("does-not-exist").await.unwrap().unwrap();
        assert_eq!(record.status, EvaluationStatus::Cancelled);
    }

    #[tokio::test]
    async fn running_event_for_unknown_evaluation_creates_it() {
        let r = reconciler().await;
        let started_at = Utc::now();
        let payload = json!({
            "eval_id": "eval-unseen",
            "executor_id": "job-eval-unseen",
            "container_id": "job-eval-unseen",
            "timeout": 300,
            "started_at": started_at.to_rfc3339(),
        });
        r.handle_running(&serde_json::to_vec(&payload).unwrap())
            .await
            .unwrap();

        let record = r.facade.get("eval-unseen").await.unwrap().unwrap();
        assert_eq!(record.status, EvaluationStatus::Running);
        assert!(r.bus.set_contains(RUNNING_SET_KEY, "eval-unseen").await.unwrap());
    }

    #[tokio::test]
    async fn queued_event_for_unknown_evaluation_creates_it() {
        let r = reconciler().await;
        let payload = json!({ "eval_id": "eval-unseen" });
        r.handle_queued(&serde_json::to_vec(&payload).unwrap())
            .await
            .unwrap();

        let record = r.facade.get("eval-unseen").await.unwrap().unwrap();
        assert_eq!(record.status, EvaluationStatus::Queued);
    }
}
