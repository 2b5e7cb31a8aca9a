use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate an evaluation id of the form `YYYYMMDD_HHMMSS_<8 hex>`, UTC.
pub fn generate_evaluation_id(now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S");
    format!("{stamp}_{}", random_hex(8))
}

/// SHA-256 content digest of submitted code, as lowercase hex.
pub fn code_hash(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

fn random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let n: u8 = rng.gen_range(0..16);
            std::char::from_digit(n as u32, 16).unwrap()
        })
        .collect()
}

/// Deterministically derive an execution-unit name from an evaluation id:
/// lowercase, underscores replaced with hyphens, truncated to 20 chars,
/// followed by a random 8-hex suffix (so repeated calls for the same
/// evaluation never collide, while still satisfying the single-unit
/// invariant — callers create at most one unit per evaluation).
pub fn derive_job_name(evaluation_id: &str) -> String {
    let sanitized: String = evaluation_id
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' { '-' } else { c })
        .collect();
    let truncated: String = sanitized.chars().take(20).collect();
    let truncated = truncated.trim_end_matches('-').to_string();
    format!("{truncated}-{}", random_hex(8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn evaluation_id_has_expected_shape() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 13, 5, 9).unwrap();
        let id = generate_evaluation_id(now);
        assert!(id.starts_with("20260728_130509_"));
        let suffix = id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn code_hash_is_stable_and_content_addressed() {
        let a = code_hash("print('hi')");
        let b = code_hash("print('hi')");
        let c = code_hash("print('bye')");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn job_name_is_sanitized_and_length_bounded() {
        let name = derive_job_name("20260728_130509_deadbeef");
        assert!(!name.contains('_'));
        assert!(name.chars().all(|c| c.is_ascii_lowercase()
            || c.is_ascii_digit()
            || c == '-'));
        // 20-char prefix + '-' + 8 hex = 29, but the prefix may have its
        // trailing separator trimmed first.
        assert!(name.len() <= 29);
    }

    #[test]
    fn job_name_truncates_long_ids() {
        let long_id = "a".repeat(50);
        let name = derive_job_name(&long_id);
        let prefix_len = name.len() - 1 - 8;
        assert!(prefix_len <= 20);
    }
}
