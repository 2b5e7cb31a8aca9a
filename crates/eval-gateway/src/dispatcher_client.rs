use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Thin HTTP client for the Dispatcher's (C3) synchronous operations the
/// Gateway needs: an admission-control read and cancellation. Mirrors the
/// wire shape produced by `eval-dispatcher`'s own handlers.
pub struct DispatcherClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityResponse {
    pub has_capacity: bool,
    pub available_memory_mb: u64,
    pub available_cpu_millicores: u64,
    pub total_memory_mb: u64,
    pub total_cpu_millicores: u64,
    pub reason: Option<String>,
}

impl DispatcherClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with default config"),
        }
    }

    pub async fn check_capacity(
        &self,
        memory_mb: u64,
        cpu_millicores: u64,
    ) -> Result<CapacityResponse, reqwest::Error> {
        self.http
            .get(format!("{}/capacity/check", self.base_url))
            .query(&[
                ("memory_mb", memory_mb.to_string()),
                ("cpu_millicores", cpu_millicores.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub async fn delete_job(&self, job_name: &str) -> Result<(), reqwest::Error> {
        self.http
            .delete(format!("{}/jobs/{}", self.base_url, job_name))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
