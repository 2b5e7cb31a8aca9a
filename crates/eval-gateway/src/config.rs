use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Gateway configuration loaded from environment variables (§6), scoped to
/// exactly what this binary reads.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub broker_url: String,
    pub object_store_path: String,
    pub secondary_store_path: String,
    pub port: u16,
    pub max_job_ttl: u32,
    pub dispatcher_base_url: String,
    /// Informational only: the Gateway does not manage workers itself, but
    /// `GetQueueStatus` (§4.1 supplemented operation) reports the
    /// configured pool size alongside live queue/evaluation counts.
    pub worker_pool_size: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            broker_url: env::var("BROKER_URL")
                .unwrap_or_else(|_| "redis://localhost:6379/1".to_string()),
            object_store_path: env::var("OBJECT_STORE_URL")
                .unwrap_or_else(|_| "./data/objects".to_string()),
            secondary_store_path: env::var("SECONDARY_STORE_PATH")
                .unwrap_or_else(|_| "./data/records".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            max_job_ttl: env::var("MAX_JOB_TTL")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("MAX_JOB_TTL must be a valid number")?,
            dispatcher_base_url: env::var("DISPATCHER_URL")
                .unwrap_or_else(|_| "http://localhost:8082".to_string()),
            worker_pool_size: env::var("WORKER_POOL_SIZE")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .context("WORKER_POOL_SIZE must be a valid number")?,
        })
    }
}
