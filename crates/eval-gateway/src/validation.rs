use eval_types::{parse_cpu_millicores, parse_memory_mb};

use crate::dispatcher_client::CapacityResponse;
use crate::error::ApiError;

/// `timeout ∈ [1, MAX_JOB_TTL]` (§4.1 Constraints).
pub fn validate_timeout(timeout_seconds: u32, max_job_ttl: u32) -> Result<(), ApiError> {
    if timeout_seconds < 1 || timeout_seconds > max_job_ttl {
        return Err(ApiError::InvalidRequest(format!(
            "timeout must be between 1 and {max_job_ttl} seconds, got {timeout_seconds}"
        )));
    }
    Ok(())
}

pub fn validate_priority(priority: i8) -> Result<(), ApiError> {
    if !(-1..=1).contains(&priority) {
        return Err(ApiError::InvalidRequest(format!(
            "priority must be in {{-1, 0, 1}}, got {priority}"
        )));
    }
    Ok(())
}

pub fn validate_code_nonempty(code: &str) -> Result<(), ApiError> {
    if code.trim().is_empty() {
        return Err(ApiError::InvalidRequest("code must not be empty".into()));
    }
    Ok(())
}

/// Reject a request whose resource limits exceed the cluster quota's
/// absolute hard totals, distinct from transient quota exhaustion which
/// C2 retries (§4.1 Constraints, §7 `QuotaRejected`).
pub fn validate_against_quota(
    memory_limit: &str,
    cpu_limit: &str,
    capacity: &CapacityResponse,
) -> Result<(), ApiError> {
    let requested_memory_mb = parse_memory_mb(memory_limit)
        .map_err(|e| ApiError::InvalidRequest(format!("invalid memory_limit: {e}")))?;
    let requested_cpu_millicores = parse_cpu_millicores(cpu_limit)
        .map_err(|e| ApiError::InvalidRequest(format!("invalid cpu_limit: {e}")))?;

    if requested_memory_mb > capacity.total_memory_mb {
        return Err(ApiError::QuotaRejected(format!(
            "requested memory {requested_memory_mb}MB exceeds cluster quota {}MB",
            capacity.total_memory_mb
        )));
    }
    if requested_cpu_millicores > capacity.total_cpu_millicores {
        return Err(ApiError::QuotaRejected(format!(
            "requested cpu {requested_cpu_millicores}m exceeds cluster quota {}m",
            capacity.total_cpu_millicores
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_out_of_range_is_rejected() {
        assert!(validate_timeout(0, 3600).is_err());
        assert!(validate_timeout(3601, 3600).is_err());
        assert!(validate_timeout(30, 3600).is_ok());
    }

    #[test]
    fn priority_outside_bucket_is_rejected() {
        assert!(validate_priority(-1).is_ok());
        assert!(validate_priority(0).is_ok());
        assert!(validate_priority(1).is_ok());
        assert!(validate_priority(5).is_err());
    }

    #[test]
    fn quota_rejects_oversized_memory_request() {
        let capacity = CapacityResponse {
            has_capacity: true,
            available_memory_mb: 1024,
            available_cpu_millicores: 2000,
            total_memory_mb: 2048,
            total_cpu_millicores: 4000,
            reason: None,
        };
        assert!(validate_against_quota("4Gi", "500m", &capacity).is_err());
        assert!(validate_against_quota("512Mi", "500m", &capacity).is_ok());
    }
}
