//! Dispatcher (C3): translates work items into isolated execution units on
//! the cluster scheduler, enforces admission control against the namespace
//! resource quota, watches cluster events, and publishes lifecycle events.

mod config;
mod error;
mod events;
mod image_catalog;
mod isolation;
mod job_phase;
mod log_aggregation;
mod manifest;
mod operations;
mod routes;
mod state;
mod watcher;

use std::sync::Arc;

use anyhow::{Context, Result};
use eval_bus::RedisBus;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::image_catalog::ImageCatalog;
use crate::isolation::IsolationCache;
use crate::log_aggregation::LogAggregationClient;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,eval_dispatcher=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = Arc::new(Config::from_env()?);
    tracing::info!(
        namespace = %config.namespace,
        port = config.port,
        "starting eval-dispatcher"
    );

    let client = kube::Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;
    let bus = Arc::new(
        RedisBus::connect(&config.redis_url)
            .await
            .context("failed to connect to the bus")?,
    );
    let image_catalog = Arc::new(ImageCatalog::new(
        client.clone(),
        config.namespace.clone(),
        config.registry_prefix.clone(),
        config.default_image_tag.clone(),
        config.executor_image.clone(),
    ));
    let isolation = Arc::new(IsolationCache::new());
    let log_aggregation = config
        .log_aggregation_url
        .as_ref()
        .map(|url| Arc::new(LogAggregationClient::new(url.clone())));

    let state = Arc::new(AppState {
        client,
        bus,
        image_catalog,
        isolation,
        log_aggregation,
        config: config.clone(),
    });

    let watcher_handle = if config.enable_event_monitoring {
        tracing::info!("event-driven status monitoring enabled, starting job watcher");
        Some(watcher::spawn(state.clone()))
    } else {
        tracing::info!("event-driven status monitoring disabled, relying on Worker polling fallback");
        None
    };

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .context("failed to bind dispatcher listener")?;
    tracing::info!(port = config.port, "eval-dispatcher listening");

    let serve_result = axum::serve(listener, app).await.context("dispatcher server error");
    if let Some(handle) = watcher_handle {
        handle.abort();
    }
    serve_result
}
