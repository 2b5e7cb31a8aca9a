use std::collections::HashMap;
use std::time::Duration;

use eval_bus::DlqEntry;
use rand::Rng;

use crate::error::RetryPolicy;

const BASE_DELAY_SECS: f64 = 1.0;
const CAP_DELAY_SECS: f64 = 600.0;

/// `min(cap, base · 2^retry) · uniform(0.5, 1.5)` (§4.2). Both policies
/// share the same base/cap; only `MAX_RETRIES` differs between them.
pub fn retry_delay(retry: u32) -> Duration {
    let exponential = BASE_DELAY_SECS * 2f64.powi(retry as i32);
    let capped = exponential.min(CAP_DELAY_SECS);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(capped * jitter)
}

/// A diagnostic message describing the next attempt, merged into the
/// record's `metadata.retry_message` while the evaluation is still
/// in-flight (§4.2 Supplemented behavior).
pub fn retry_message(policy: RetryPolicy, retry: u32) -> String {
    let max = policy.max_retries();
    let kind = match policy {
        RetryPolicy::Default => "transient failure",
        RetryPolicy::Quota => "resource exhaustion",
    };
    format!("retrying after {kind} (attempt {retry} of {max})")
}

/// Pure, unit-testable identity string; no periodic task is scheduled for
/// it (§4.2 Supplemented behavior — a `health_check`-style no-op exists
/// only as this function).
pub fn worker_identity(hostname: &str, pid: u32) -> String {
    format!("eval-worker-{hostname}-{pid}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DlqStatistics {
    pub total: usize,
    pub by_exception_class: HashMap<String, usize>,
}

/// Pure classification over a batch of DLQ entries (§4.2 Supplemented
/// behavior): C2 owns DLQ state, so the statistics function it would call
/// from a periodic maintenance task is in scope even though the scheduling
/// of that task is not (§1 excludes operational tooling).
pub fn dlq_statistics(entries: &[DlqEntry]) -> DlqStatistics {
    let mut by_exception_class = HashMap::new();
    for entry in entries {
        *by_exception_class.entry(entry.exception_class.clone()).or_insert(0) += 1;
    }
    DlqStatistics {
        total: entries.len(),
        by_exception_class,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    #[test]
    fn retry_delay_never_exceeds_jittered_cap() {
        for retry in 0..20 {
            let delay = retry_delay(retry);
            assert!(delay.as_secs_f64() <= CAP_DELAY_SECS * 1.5 + 0.01);
        }
    }

    #[test]
    fn retry_delay_grows_with_attempt_number_before_capping() {
        let early = retry_delay(0);
        // Even with jitter's widest spread (0.5x vs 1.5x), repeated low
        // attempts should trend upward; sample many times for attempt 3
        // and confirm its floor exceeds attempt 0's ceiling.
        let floor_at_3 = BASE_DELAY_SECS * 2f64.powi(3) * 0.5;
        let ceiling_at_0 = BASE_DELAY_SECS * 1.5;
        assert!(floor_at_3 > ceiling_at_0);
        assert!(early.as_secs_f64() >= BASE_DELAY_SECS * 0.5);
    }

    #[test]
    fn worker_identity_is_deterministic_given_inputs() {
        assert_eq!(worker_identity("host-a", 42), worker_identity("host-a", 42));
        assert_ne!(worker_identity("host-a", 42), worker_identity("host-b", 42));
    }

    fn sample_entry(exception_class: &str) -> DlqEntry {
        DlqEntry {
            task_id: "t1".into(),
            name: "evaluate".into(),
            evaluation_id: "eval-1".into(),
            args: Value::Null,
            exception_class: exception_class.to_string(),
            traceback: String::new(),
            retries: 5,
            metadata: Map::new(),
        }
    }

    #[test]
    fn dlq_statistics_groups_by_exception_class() {
        let entries = vec![
            sample_entry("TimeoutError"),
            sample_entry("TimeoutError"),
            sample_entry("ConnectionError"),
        ];
        let stats = dlq_statistics(&entries);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_exception_class.get("TimeoutError"), Some(&2));
        assert_eq!(stats.by_exception_class.get("ConnectionError"), Some(&1));
    }
}
