//! Log-aggregation fallback for `GetJobLogs` (§4.3.1): used once a unit's
//! pod has been garbage-collected and the scheduler API no longer has logs.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

const QUERY_WINDOW: chrono::Duration = chrono::Duration::hours(1);
const LINE_LIMIT: u32 = 5000;

#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    status: String,
    data: QueryRangeData,
}

#[derive(Debug, Deserialize)]
struct QueryRangeData {
    result: Vec<StreamResult>,
}

#[derive(Debug, Deserialize)]
struct StreamResult {
    values: Vec<[String; 2]>,
}

pub struct LogAggregationClient {
    base_url: String,
    http: reqwest::Client,
}

impl LogAggregationClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builds with default config"),
        }
    }

    /// Query for logs emitted by pods matching `job_name.*` over the last
    /// hour. Returns `None` if the backend has no streams for this job
    /// (distinct from an empty-but-present log).
    pub async fn query_job_logs(&self, namespace: &str, job_name: &str) -> Option<String> {
        let query = format!(
            r#"{{job="fluentbit",kubernetes_namespace_name="{namespace}",kubernetes_pod_name=~"{job_name}.*"}}"#
        );
        let end = Utc::now();
        let start = end - QUERY_WINDOW;

        let response = self
            .http
            .get(format!("{}/loki/api/v1/query_range", self.base_url))
            .query(&[
                ("query", query.as_str()),
                ("start", &(start.timestamp_nanos_opt().unwrap_or(0)).to_string()),
                ("end", &(end.timestamp_nanos_opt().unwrap_or(0)).to_string()),
                ("limit", &LINE_LIMIT.to_string()),
                ("direction", "forward"),
            ])
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::warn!(status = %r.status(), "log aggregation query failed");
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, "error querying log aggregation backend");
                return None;
            }
        };

        let parsed: QueryRangeResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "malformed log aggregation response");
                return None;
            }
        };
        if parsed.status != "success" || parsed.data.result.is_empty() {
            return None;
        }

        let mut lines = Vec::new();
        for stream in parsed.data.result {
            for [_, line] in stream.values {
                lines.push(extract_log_line(&line));
            }
        }
        Some(lines.join("\n"))
    }
}

/// Fluent Bit ships each line as JSON with a `log` field carrying the raw
/// container output, prefixed with a CRI-format timestamp and stream tag
/// (`<ts> stdout F <message>`). Unwrap both layers, falling back to the
/// original text if either doesn't match.
fn extract_log_line(raw: &str) -> String {
    let message = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(obj)) => obj
            .get("log")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| raw.to_string()),
        _ => raw.to_string(),
    };

    let parts: Vec<&str> = message.splitn(4, ' ').collect();
    if parts.len() == 4 && (parts[2] == "F" || parts[2] == "P") {
        parts[3].trim_end_matches('\n').to_string()
    } else {
        message.trim_end_matches('\n').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_fluentbit_json_and_cri_framing() {
        let raw = r#"{"log":"2025-07-24T10:38:29.007631626Z stderr F hello world\n"}"#;
        assert_eq!(extract_log_line(raw), "hello world");
    }

    #[test]
    fn falls_back_to_raw_line_when_not_json() {
        let raw = "plain text line";
        assert_eq!(extract_log_line(raw), "plain text line");
    }

    #[test]
    fn falls_back_when_json_has_no_log_field() {
        let raw = r#"{"other":"value"}"#;
        assert_eq!(extract_log_line(raw), raw);
    }
}
