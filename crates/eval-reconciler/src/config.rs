use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Reconciler (C4) configuration loaded from environment variables (§6),
/// scoped to exactly what this binary reads: it never serves HTTP, calls
/// the broker, or talks to the cluster scheduler, so it has none of
/// those settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub object_store_path: String,
    pub secondary_store_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            object_store_path: env::var("OBJECT_STORE_URL")
                .unwrap_or_else(|_| "./data/objects".to_string()),
            secondary_store_path: env::var("SECONDARY_STORE_PATH")
                .unwrap_or_else(|_| "./data/records".to_string()),
        })
    }
}
