use thiserror::Error;

/// Outcome of an outbound call to the Dispatcher (§7 `SchedulerUnavailable`,
/// `ValidationError`), classified into a retry decision by [`classify`]
/// rather than parsed from free-form messages.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("dispatcher returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("connection to dispatcher failed: {0}")]
    Connection(String),
    #[error("dispatcher call timed out")]
    Timeout,
}

/// The two backoff tables named in §4.2: `Default` for generic failures
/// (`MAX_RETRIES`), `Quota` for resource exhaustion (`MAX_QUOTA_RETRIES`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Default,
    Quota,
}

pub const MAX_RETRIES: u32 = 5;
pub const MAX_QUOTA_RETRIES: u32 = 10;

impl RetryPolicy {
    pub fn max_retries(self) -> u32 {
        match self {
            RetryPolicy::Default => MAX_RETRIES,
            RetryPolicy::Quota => MAX_QUOTA_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(RetryPolicy),
    NonRetryableValidation,
}

/// Classify an HTTP status code from the Dispatcher into a retry decision
/// (§4.2 step 4): 408/429 retry (429 on the quota policy), other 4xx are
/// permanent validation failures, 5xx retries on the default policy.
pub fn classify_status(status: u16) -> RetryDecision {
    match status {
        408 => RetryDecision::Retry(RetryPolicy::Default),
        429 => RetryDecision::Retry(RetryPolicy::Quota),
        400..=499 => RetryDecision::NonRetryableValidation,
        _ => RetryDecision::Retry(RetryPolicy::Default),
    }
}

/// Classify a [`CallError`] the same way, treating connection failures and
/// client-side timeouts as retryable scheduler-unavailability.
pub fn classify(error: &CallError) -> RetryDecision {
    match error {
        CallError::Status { status, .. } => classify_status(*status),
        CallError::Connection(_) | CallError::Timeout => RetryDecision::Retry(RetryPolicy::Default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_retryable_client_errors_exclude_408_and_429() {
        assert_eq!(classify_status(400), RetryDecision::NonRetryableValidation);
        assert_eq!(classify_status(404), RetryDecision::NonRetryableValidation);
        assert_eq!(classify_status(408), RetryDecision::Retry(RetryPolicy::Default));
        assert_eq!(classify_status(429), RetryDecision::Retry(RetryPolicy::Quota));
    }

    #[test]
    fn server_errors_retry_on_default_policy() {
        assert_eq!(classify_status(500), RetryDecision::Retry(RetryPolicy::Default));
        assert_eq!(classify_status(503), RetryDecision::Retry(RetryPolicy::Default));
    }

    #[test]
    fn connection_and_timeout_errors_are_retryable() {
        assert_eq!(
            classify(&CallError::Connection("refused".into())),
            RetryDecision::Retry(RetryPolicy::Default)
        );
        assert_eq!(classify(&CallError::Timeout), RetryDecision::Retry(RetryPolicy::Default));
    }
}
