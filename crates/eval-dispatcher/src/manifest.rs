//! Execution-unit manifest construction (§4.3.3 step 4).

use chrono::Utc;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, EmptyDirVolumeSource, EnvVar, PodSecurityContext, PodSpec,
    PodTemplateSpec, ResourceRequirements, SeccompProfile, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

use eval_types::{min_cpu_millicores, min_memory_mb, parse_cpu_millicores, parse_memory_mb, Priority};

/// Default memory/CPU request floors, used as the other operand of
/// `min(limit, default)` when deriving a unit's resource requests.
const DEFAULT_REQUEST_MEMORY: &str = "128Mi";
const DEFAULT_REQUEST_CPU: &str = "100m";

const SCRATCH_VOLUME_SIZE: &str = "100Mi";
const TERMINATION_GRACE_SECONDS: i64 = 1;
const ACTIVE_DEADLINE_BUFFER_SECONDS: i64 = 300;

pub struct ManifestInput<'a> {
    pub job_name: &'a str,
    pub evaluation_id: &'a str,
    pub code: &'a str,
    pub timeout_seconds: u32,
    pub memory_limit: &'a str,
    pub cpu_limit: &'a str,
    pub priority: Priority,
    pub image: &'a str,
    pub isolation_runtime_class: Option<&'a str>,
    pub job_cleanup_ttl: u32,
}

/// Build the Job manifest the scheduler is asked to create. Resource
/// requests are the minimum of the requested limit and a fixed default
/// floor, so a request never exceeds its own limit.
pub fn build_job(input: &ManifestInput<'_>) -> Job {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), "evaluation".to_string());
    labels.insert("eval-id".to_string(), input.evaluation_id.to_string());
    labels.insert("created-by".to_string(), "dispatcher".to_string());

    let mut annotations = BTreeMap::new();
    annotations.insert("eval-id".to_string(), input.evaluation_id.to_string());
    annotations.insert("created-at".to_string(), Utc::now().to_rfc3339());

    let mut pod_labels = BTreeMap::new();
    pod_labels.insert("app".to_string(), "evaluation".to_string());
    pod_labels.insert("eval-id".to_string(), input.evaluation_id.to_string());

    let requests = resource_requests(input.memory_limit, input.cpu_limit);
    let limits = resource_limits(input.memory_limit, input.cpu_limit);

    let container = Container {
        name: "evaluation".to_string(),
        image: Some(input.image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec![
            "timeout_wrapper.sh".to_string(),
            input.timeout_seconds.to_string(),
            "python".to_string(),
            "-u".to_string(),
            "-c".to_string(),
            input.code.to_string(),
        ]),
        env: Some(vec![
            EnvVar {
                name: "EVAL_ID".to_string(),
                value: Some(input.evaluation_id.to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "PYTHONUNBUFFERED".to_string(),
                value: Some("1".to_string()),
                ..Default::default()
            },
        ]),
        resources: Some(ResourceRequirements {
            limits: Some(limits),
            requests: Some(requests),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            read_only_root_filesystem: Some(true),
            run_as_non_root: Some(true),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: "tmp".to_string(),
            mount_path: "/tmp".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        restart_policy: Some("Never".to_string()),
        runtime_class_name: input.isolation_runtime_class.map(str::to_string),
        priority_class_name: Some(input.priority.priority_class_name().to_string()),
        termination_grace_period_seconds: Some(TERMINATION_GRACE_SECONDS),
        security_context: Some(PodSecurityContext {
            run_as_non_root: Some(true),
            run_as_user: Some(1000),
            fs_group: Some(1000),
            seccomp_profile: Some(SeccompProfile {
                type_: "RuntimeDefault".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        containers: vec![container],
        volumes: Some(vec![Volume {
            name: "tmp".to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                size_limit: Some(Quantity(SCRATCH_VOLUME_SIZE.to_string())),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(input.job_name.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(JobSpec {
            ttl_seconds_after_finished: Some(input.job_cleanup_ttl as i32),
            active_deadline_seconds: Some(input.timeout_seconds as i64 + ACTIVE_DEADLINE_BUFFER_SECONDS),
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn resource_limits(memory_limit: &str, cpu_limit: &str) -> BTreeMap<String, Quantity> {
    let mut limits = BTreeMap::new();
    limits.insert("memory".to_string(), Quantity(memory_limit.to_string()));
    limits.insert("cpu".to_string(), Quantity(cpu_limit.to_string()));
    limits
}

fn resource_requests(memory_limit: &str, cpu_limit: &str) -> BTreeMap<String, Quantity> {
    let mut requests = BTreeMap::new();
    requests.insert(
        "memory".to_string(),
        min_quantity_mb(memory_limit, DEFAULT_REQUEST_MEMORY),
    );
    requests.insert(
        "cpu".to_string(),
        min_quantity_cpu(cpu_limit, DEFAULT_REQUEST_CPU),
    );
    requests
}

fn min_quantity_mb(limit: &str, default: &str) -> Quantity {
    let limit_mb = parse_memory_mb(limit).unwrap_or(0);
    let default_mb = parse_memory_mb(default).unwrap_or(0);
    if min_memory_mb(limit_mb, default_mb) == limit_mb {
        Quantity(limit.to_string())
    } else {
        Quantity(default.to_string())
    }
}

fn min_quantity_cpu(limit: &str, default: &str) -> Quantity {
    let limit_mc = parse_cpu_millicores(limit).unwrap_or(0);
    let default_mc = parse_cpu_millicores(default).unwrap_or(0);
    if min_cpu_millicores(limit_mc, default_mc) == limit_mc {
        Quantity(limit.to_string())
    } else {
        Quantity(default.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(job_name: &'a str, eval_id: &'a str, code: &'a str, image: &'a str) -> ManifestInput<'a> {
        ManifestInput {
            job_name,
            evaluation_id: eval_id,
            code,
            timeout_seconds: 30,
            memory_limit: "512Mi",
            cpu_limit: "500m",
            priority: Priority::Normal,
            image,
            isolation_runtime_class: Some("gvisor"),
            job_cleanup_ttl: 300,
        }
    }

    #[test]
    fn job_carries_required_labels_and_limits() {
        let job = build_job(&input("job-abc", "eval-1", "print(1)", "executor-ml:latest"));
        let labels = job.metadata.labels.unwrap();
        assert_eq!(labels.get("app").unwrap(), "evaluation");
        assert_eq!(labels.get("eval-id").unwrap(), "eval-1");

        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(spec.active_deadline_seconds, Some(330));
        assert_eq!(spec.ttl_seconds_after_finished, Some(300));

        let pod_spec = spec.template.spec.unwrap();
        assert_eq!(pod_spec.runtime_class_name.as_deref(), Some("gvisor"));
        assert_eq!(pod_spec.priority_class_name.as_deref(), Some("normal-priority-evaluation"));
        assert_eq!(pod_spec.termination_grace_period_seconds, Some(1));
    }

    #[test]
    fn request_never_exceeds_limit() {
        let job = build_job(&input("job-abc", "eval-1", "print(1)", "executor-ml:latest"));
        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
        let resources = container.resources.as_ref().unwrap();
        let requests = resources.requests.as_ref().unwrap();
        // 512Mi limit > 128Mi default, so the request floors at the default.
        assert_eq!(requests.get("memory").unwrap().0, "128Mi");
        // 500m limit > 100m default, so the request floors at the default.
        assert_eq!(requests.get("cpu").unwrap().0, "100m");
    }

    #[test]
    fn small_limit_is_its_own_request() {
        let mut input = input("job-abc", "eval-1", "print(1)", "executor-ml:latest");
        input.memory_limit = "64Mi";
        input.cpu_limit = "50m";
        let job = build_job(&input);
        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
        let requests = container.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests.get("memory").unwrap().0, "64Mi");
        assert_eq!(requests.get("cpu").unwrap().0, "50m");
    }

    #[test]
    fn no_isolation_runtime_class_when_unavailable() {
        let mut input = input("job-abc", "eval-1", "print(1)", "executor-ml:latest");
        input.isolation_runtime_class = None;
        let job = build_job(&input);
        let pod_spec = job.spec.unwrap().template.spec.unwrap();
        assert!(pod_spec.runtime_class_name.is_none());
    }
}
