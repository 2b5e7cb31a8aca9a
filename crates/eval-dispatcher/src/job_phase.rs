//! Shared job-status classification (§4.3.6), used by both `GetJobStatus`
//! and the event-driven watcher so the two never disagree.

use k8s_openapi::api::batch::v1::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// `active>0 -> running`, `succeeded>0 -> succeeded`, `failed>0 -> failed`,
/// else `pending`.
pub fn classify(job: &Job) -> JobPhase {
    let status = job.status.as_ref();
    let active = status.and_then(|s| s.active).unwrap_or(0);
    let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
    let failed = status.and_then(|s| s.failed).unwrap_or(0);

    if active > 0 {
        JobPhase::Running
    } else if succeeded > 0 {
        JobPhase::Succeeded
    } else if failed > 0 {
        JobPhase::Failed
    } else {
        JobPhase::Pending
    }
}

pub fn eval_id_label(job: &Job) -> Option<String> {
    job.metadata.labels.as_ref()?.get("eval-id").cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn job_with_status(active: Option<i32>, succeeded: Option<i32>, failed: Option<i32>) -> Job {
        Job {
            metadata: ObjectMeta::default(),
            spec: None,
            status: Some(JobStatus {
                active,
                succeeded,
                failed,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn active_takes_priority() {
        assert_eq!(classify(&job_with_status(Some(1), Some(1), None)), JobPhase::Running);
    }

    #[test]
    fn succeeded_before_failed() {
        assert_eq!(classify(&job_with_status(None, Some(1), Some(1))), JobPhase::Succeeded);
    }

    #[test]
    fn failed_when_only_failed_set() {
        assert_eq!(classify(&job_with_status(None, None, Some(1))), JobPhase::Failed);
    }

    #[test]
    fn no_status_counters_is_pending() {
        assert_eq!(classify(&job_with_status(None, None, None)), JobPhase::Pending);
        let bare = Job {
            metadata: ObjectMeta::default(),
            spec: None,
            status: None,
        };
        assert_eq!(classify(&bare), JobPhase::Pending);
    }
}
