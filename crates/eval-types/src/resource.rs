use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Relative execution priority. Maps to scheduler priority classes
/// `{high,normal,low}-priority-evaluation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i8)]
pub enum Priority {
    Low = -1,
    Normal = 0,
    High = 1,
}

impl Priority {
    pub fn from_i8(v: i8) -> Self {
        if v > 0 {
            Self::High
        } else if v < 0 {
            Self::Low
        } else {
            Self::Normal
        }
    }

    /// Name of the PriorityClass object this maps to on the scheduler.
    pub fn priority_class_name(self) -> &'static str {
        match self {
            Self::High => "high-priority-evaluation",
            Self::Normal => "normal-priority-evaluation",
            Self::Low => "low-priority-evaluation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Memory limit, e.g. `"512Mi"`, `"1Gi"`.
    pub memory_limit_mb: u64,
    /// CPU limit, in millicores.
    pub cpu_limit_millicores: u64,
}

#[derive(Debug, Error)]
pub enum ResourceParseError {
    #[error("empty resource string")]
    Empty,
    #[error("invalid numeric value in resource string: {0:?}")]
    InvalidNumber(String),
}

/// Parse a Kubernetes-style memory quantity string into whole megabytes.
///
/// Bit-exact with the reference implementation: `Ti`/`Gi`/`Mi`/`Ki` are
/// powers of 1024, truncated toward zero after the float multiply/divide;
/// an unsuffixed string is raw bytes, also truncated after `/1024/1024`.
pub fn parse_memory_mb(raw: &str) -> Result<u64, ResourceParseError> {
    if raw.is_empty() {
        return Err(ResourceParseError::Empty);
    }
    let parse_f64 = |s: &str| -> Result<f64, ResourceParseError> {
        s.parse::<f64>()
            .map_err(|_| ResourceParseError::InvalidNumber(s.to_string()))
    };
    let mb = if let Some(value) = raw.strip_suffix("Ti") {
        parse_f64(value)? * 1024.0 * 1024.0
    } else if let Some(value) = raw.strip_suffix("Gi") {
        parse_f64(value)? * 1024.0
    } else if let Some(value) = raw.strip_suffix("Mi") {
        parse_f64(value)?
    } else if let Some(value) = raw.strip_suffix("Ki") {
        parse_f64(value)? / 1024.0
    } else {
        let bytes = parse_f64(raw)?;
        bytes / 1024.0 / 1024.0
    };
    Ok(mb.trunc().max(0.0) as u64)
}

/// Parse a Kubernetes-style CPU quantity string into millicores.
///
/// Bit-exact with the reference implementation: an `m` suffix is taken as
/// literal millicores (truncated, not rounded); otherwise the value is
/// whole cores, multiplied by 1000 and truncated.
pub fn parse_cpu_millicores(raw: &str) -> Result<u64, ResourceParseError> {
    if raw.is_empty() {
        return Err(ResourceParseError::Empty);
    }
    if let Some(value) = raw.strip_suffix('m') {
        let millicores = value
            .parse::<f64>()
            .map_err(|_| ResourceParseError::InvalidNumber(value.to_string()))?;
        Ok(millicores.trunc().max(0.0) as u64)
    } else {
        let cores = raw
            .parse::<f64>()
            .map_err(|_| ResourceParseError::InvalidNumber(raw.to_string()))?;
        Ok((cores * 1000.0).trunc().max(0.0) as u64)
    }
}

/// The smaller of `limit` and `default`, per-dimension, so that a
/// manifest's resource *requests* never exceed its *limits*.
pub fn min_memory_mb(limit_mb: u64, default_mb: u64) -> u64 {
    limit_mb.min(default_mb)
}

pub fn min_cpu_millicores(limit_millicores: u64, default_millicores: u64) -> u64 {
    limit_millicores.min(default_millicores)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binary_memory_suffixes() {
        assert_eq!(parse_memory_mb("512Mi").unwrap(), 512);
        assert_eq!(parse_memory_mb("1Gi").unwrap(), 1024);
        assert_eq!(parse_memory_mb("1Ti").unwrap(), 1024 * 1024);
    }

    #[test]
    fn ki_truncates_toward_zero() {
        // 1024Ki = 1Mi; 512Ki truncates to 0Mi, matching int(512/1024).
        assert_eq!(parse_memory_mb("1024Ki").unwrap(), 1);
        assert_eq!(parse_memory_mb("512Ki").unwrap(), 0);
    }

    #[test]
    fn unsuffixed_memory_is_bytes() {
        assert_eq!(parse_memory_mb("1073741824").unwrap(), 1024);
        assert_eq!(parse_memory_mb("500").unwrap(), 0);
    }

    #[test]
    fn parses_cpu_millicores_and_cores() {
        assert_eq!(parse_cpu_millicores("500m").unwrap(), 500);
        assert_eq!(parse_cpu_millicores("1").unwrap(), 1000);
        assert_eq!(parse_cpu_millicores("0.5").unwrap(), 500);
    }

    #[test]
    fn cpu_core_multiply_truncates_not_rounds() {
        // 0.1999 cores -> 199.9m, truncated to 199, not rounded to 200.
        assert_eq!(parse_cpu_millicores("0.1999").unwrap(), 199);
    }

    #[test]
    fn rejects_garbage_input() {
        assert!(parse_memory_mb("").is_err());
        assert!(parse_memory_mb("notanumberMi").is_err());
        assert!(parse_cpu_millicores("notanumber").is_err());
    }

    #[test]
    fn request_never_exceeds_limit() {
        assert_eq!(min_memory_mb(64, 128), 64);
        assert_eq!(min_memory_mb(256, 128), 128);
        assert_eq!(min_cpu_millicores(50, 100), 50);
        assert_eq!(min_cpu_millicores(500, 100), 100);
    }

    #[test]
    fn priority_clamps_to_three_buckets() {
        assert_eq!(Priority::from_i8(5), Priority::High);
        assert_eq!(Priority::from_i8(-5), Priority::Low);
        assert_eq!(Priority::from_i8(0), Priority::Normal);
    }
}
