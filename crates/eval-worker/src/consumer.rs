use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eval_broker::{Reservation, WorkQueue};
use eval_bus::{Bus, DlqEntry};
use eval_storage::{Facade, UpdatePatch};
use eval_types::{parse_cpu_millicores, parse_memory_mb, EvaluationStatus};
use serde_json::{Map, Value};
use tokio::time::sleep;

use crate::config::Config;
use crate::dispatcher_client::{DispatcherClient, ExecuteRequest};
use crate::error::{classify, RetryDecision, RetryPolicy};
use crate::retry::{retry_delay, retry_message};

const JOB_NAME_TTL: Duration = Duration::from_secs(3600);
const POLL_INTERVAL: Duration = Duration::from_secs(10);
const MAX_POLL_ITERATIONS: u32 = 60;

/// One of the N concurrent consumers drawing from the broker (§5). Each
/// reservation is processed to completion (ack/nack/dead-letter) before
/// the consumer reserves its next item.
pub struct Consumer {
    pub facade: Arc<Facade>,
    pub queue: Arc<dyn WorkQueue>,
    pub bus: Arc<dyn Bus>,
    pub dispatcher: Arc<DispatcherClient>,
    pub config: Arc<Config>,
}

impl Consumer {
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.queue.reserve(Duration::from_secs(5)).await {
                Ok(Some(reservation)) => self.process(reservation).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "broker reserve failed");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// §4.2 per-item algorithm, steps 1-4 and 6 (step 5 is
    /// `spawn_polling_fallback`).
    async fn process(&self, reservation: Reservation) {
        let eval_id = reservation.item.eval_id.clone();
        let now = Utc::now();

        if let Err(e) = self
            .facade
            .update(&eval_id, UpdatePatch::status(EvaluationStatus::Provisioning), now)
            .await
        {
            tracing::error!(error = %e, %eval_id, "failed to mark evaluation provisioning");
        }

        let memory_mb = match parse_memory_mb(&reservation.item.memory_limit) {
            Ok(v) => v,
            Err(e) => return self.fail_and_ack(reservation, &format!("invalid memory_limit: {e}")).await,
        };
        let cpu_millicores = match parse_cpu_millicores(&reservation.item.cpu_limit) {
            Ok(v) => v,
            Err(e) => return self.fail_and_ack(reservation, &format!("invalid cpu_limit: {e}")).await,
        };

        match self.dispatcher.check_capacity(memory_mb, cpu_millicores).await {
            Ok(capacity) if !capacity.has_capacity => {
                self.retry_or_exhaust(reservation, RetryPolicy::Quota, "resource_exhaustion").await;
            }
            Ok(_) => self.execute(reservation).await,
            Err(e) => {
                tracing::warn!(error = %e, %eval_id, "capacity check failed, treating as scheduler unavailable");
                self.retry_or_exhaust(reservation, RetryPolicy::Default, "scheduler_unavailable").await;
            }
        }
    }

    async fn execute(&self, reservation: Reservation) {
        let item = &reservation.item;
        let eval_id = item.eval_id.clone();
        let request = ExecuteRequest {
            evaluation_id: eval_id.clone(),
            code: item.code.clone(),
            timeout: item.timeout,
            memory_limit: item.memory_limit.clone(),
            cpu_limit: item.cpu_limit.clone(),
            priority: item.priority,
            executor_image: item.executor_image.clone(),
        };

        match self.dispatcher.execute(&request).await {
            Ok(response) => {
                let mut hash = HashMap::new();
                hash.insert("job_name".to_string(), response.job_name.clone());
                if let Err(e) = self
                    .bus
                    .set_hash(&format!("eval:{eval_id}:running"), hash, JOB_NAME_TTL)
                    .await
                {
                    tracing::error!(error = %e, %eval_id, "failed to record execution unit on the bus");
                }
                if let Err(e) = self.queue.ack(&reservation).await {
                    tracing::error!(error = %e, %eval_id, "failed to ack reservation after successful execute");
                }
                if !self.config.enable_event_monitoring {
                    self.spawn_polling_fallback(eval_id, response.job_name);
                }
            }
            Err(e) => match classify(&e) {
                RetryDecision::NonRetryableValidation => {
                    self.fail_and_ack(reservation, &e.to_string()).await;
                }
                RetryDecision::Retry(policy) => {
                    self.retry_or_exhaust(reservation, policy, "scheduler_error").await;
                }
            },
        }
    }

    async fn retry_or_exhaust(&self, mut reservation: Reservation, policy: RetryPolicy, reason: &str) {
        let eval_id = reservation.item.eval_id.clone();
        let retries = reservation.item.retries;
        if retries >= policy.max_retries() {
            self.exhaust(reservation, reason).await;
            return;
        }

        reservation.item.retries += 1;
        let mut metadata = Map::new();
        metadata.insert("retries".into(), Value::from(reservation.item.retries));
        metadata.insert(
            "retry_message".into(),
            Value::from(retry_message(policy, reservation.item.retries)),
        );
        let now = Utc::now();
        if let Err(e) = self
            .facade
            .update(&eval_id, UpdatePatch::default().with_metadata(metadata), now)
            .await
        {
            tracing::error!(error = %e, %eval_id, "failed to record retry metadata");
        }

        let delay = retry_delay(reservation.item.retries);
        if let Err(e) = self.queue.nack_with_delay(reservation, delay).await {
            tracing::error!(error = %e, %eval_id, "failed to nack reservation for retry");
        }
    }

    /// Retry budget exhausted (§4.2 step 6): push a DLQ entry, mark the
    /// evaluation terminally `failed`, and permanently remove the item.
    async fn exhaust(&self, reservation: Reservation, reason: &str) {
        let eval_id = reservation.item.eval_id.clone();
        let entry = DlqEntry {
            task_id: format!("task-{eval_id}"),
            name: "evaluate".to_string(),
            evaluation_id: eval_id.clone(),
            args: serde_json::to_value(&reservation.item).unwrap_or(Value::Null),
            exception_class: reason.to_string(),
            traceback: String::new(),
            retries: reservation.item.retries,
            metadata: Map::new(),
        };
        if let Err(e) = self.bus.dlq_push(entry).await {
            tracing::error!(error = %e, %eval_id, "failed to push DLQ entry");
        }

        let mut metadata = Map::new();
        metadata.insert("reason".into(), Value::from(reason));
        metadata.insert("final_failure".into(), Value::from(true));
        let now = Utc::now();
        let patch = UpdatePatch::status(EvaluationStatus::Failed).with_metadata(metadata);
        if let Err(e) = self.facade.update(&eval_id, patch, now).await {
            tracing::error!(error = %e, %eval_id, "failed to mark evaluation failed after DLQ");
        }

        if let Err(e) = self.queue.dead_letter(reservation).await {
            tracing::error!(error = %e, %eval_id, "failed to remove exhausted item from the broker");
        }
    }

    async fn fail_and_ack(&self, reservation: Reservation, detail: &str) {
        let eval_id = reservation.item.eval_id.clone();
        let mut metadata = Map::new();
        metadata.insert("reason".into(), Value::from("validation_error"));
        metadata.insert("detail".into(), Value::from(truncate(detail, 500)));
        let now = Utc::now();
        let patch = UpdatePatch::status(EvaluationStatus::Failed).with_metadata(metadata);
        if let Err(e) = self.facade.update(&eval_id, patch, now).await {
            tracing::error!(error = %e, %eval_id, "failed to mark evaluation failed (validation)");
        }
        if let Err(e) = self.queue.ack(&reservation).await {
            tracing::error!(error = %e, %eval_id, "failed to ack non-retryable reservation");
        }
    }

    /// Polling fallback (§4.2 step 5): only spawned when event-driven
    /// status monitoring is disabled. Approximates the watcher's own
    /// running/terminal transitions by polling the Dispatcher directly,
    /// up to `MAX_POLL_ITERATIONS`; once event monitoring is re-enabled,
    /// the Reconciler's event path is authoritative and this task exits
    /// harmlessly on the next terminal observation.
    fn spawn_polling_fallback(&self, eval_id: String, job_name: String) {
        let facade = self.facade.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            for _ in 0..MAX_POLL_ITERATIONS {
                sleep(POLL_INTERVAL).await;

                let status = match dispatcher.get_job_status(&job_name).await {
                    Ok(status) => status,
                    Err(e) => {
                        tracing::debug!(error = %e, %eval_id, %job_name, "polling fallback: status check failed");
                        continue;
                    }
                };

                let now = Utc::now();
                match status.status.as_str() {
                    "running" => {
                        let patch = UpdatePatch::status(EvaluationStatus::Running)
                            .with_metadata(Map::new());
                        let _ = facade.update(&eval_id, patch, now).await;
                    }
                    "succeeded" | "failed" => {
                        let logs = dispatcher.get_job_logs(&job_name).await.ok();
                        let target = if status.status == "succeeded" {
                            EvaluationStatus::Completed
                        } else {
                            EvaluationStatus::Failed
                        };
                        let mut patch = UpdatePatch::status(target)
                            .with_exit_code(status.exit_code.or_else(|| logs.as_ref().and_then(|l| l.exit_code)).unwrap_or(-1));
                        if let Some(logs) = logs {
                            patch = if target == EvaluationStatus::Completed {
                                patch.with_output(logs.logs)
                            } else {
                                patch.with_error(logs.logs)
                            };
                        }
                        let _ = facade.update(&eval_id, patch, now).await;
                        return;
                    }
                    _ => {}
                }
            }
        });
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut idx = max_len;
        while idx > 0 && !s.is_char_boundary(idx) {
            idx -= 1;
        }
        s[..idx].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::truncate;

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "a".repeat(10);
        assert_eq!(truncate(&s, 5).len(), 5);
        assert_eq!(truncate("short", 500), "short");
    }
}
