use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Dispatcher (C3) configuration loaded from environment variables (§6).
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub namespace: String,
    pub executor_image: String,
    pub registry_prefix: String,
    pub default_image_tag: String,
    pub max_job_ttl: u32,
    pub job_cleanup_ttl: u32,
    pub redis_url: String,
    pub environment: String,
    pub host_os: String,
    pub enable_event_monitoring: bool,
    pub log_aggregation_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8082".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            namespace: env::var("KUBERNETES_NAMESPACE").unwrap_or_else(|_| "crucible".to_string()),
            executor_image: env::var("EXECUTOR_IMAGE").unwrap_or_else(|_| "executor-ml".to_string()),
            registry_prefix: env::var("REGISTRY_PREFIX").unwrap_or_default(),
            default_image_tag: env::var("DEFAULT_IMAGE_TAG").unwrap_or_else(|_| "latest".to_string()),
            max_job_ttl: env::var("MAX_JOB_TTL")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("MAX_JOB_TTL must be a valid number")?,
            job_cleanup_ttl: env::var("JOB_CLEANUP_TTL")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("JOB_CLEANUP_TTL must be a valid number")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            host_os: env::var("HOST_OS").unwrap_or_else(|_| "linux".to_string()),
            enable_event_monitoring: env::var("ENABLE_EVENT_MONITORING")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("ENABLE_EVENT_MONITORING must be true or false")?,
            log_aggregation_url: env::var("LOG_AGGREGATION_URL").ok(),
        })
    }
}
