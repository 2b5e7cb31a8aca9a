use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Worker (C2) configuration loaded from environment variables (§6).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub broker_url: String,
    pub object_store_path: String,
    pub secondary_store_path: String,
    pub dispatcher_base_url: String,
    /// Number of concurrent consumers (§5 "C2 runs N concurrent consumers
    /// (configurable)").
    pub concurrency: usize,
    /// `false` switches the polling fallback on (§4.2 step 5, §6
    /// `ENABLE_EVENT_MONITORING`, default true).
    pub enable_event_monitoring: bool,
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
            dispatcher_base_url: env::var("DISPATCHER_URL")
                .unwrap_or_else(|_| "http://localhost:8082".to_string()),
            concurrency: env::var("WORKER_CONCURRENCY")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("WORKER_CONCURRENCY must be a valid number")?,
            enable_event_monitoring: env::var("ENABLE_EVENT_MONITORING")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("ENABLE_EVENT_MONITORING must be true or false")?,
        })
    }
}
