//! Gateway (C1): accepts submissions, mints evaluation ids, persists the
//! initial record through the façade, enqueues a work item, and serves
//! status/listing/cancellation queries.

mod config;
mod dispatcher_client;
mod error;
mod routes;
mod state;
mod validation;

use std::sync::Arc;

use anyhow::{Context, Result};
use eval_broker::RedisBroker;
use eval_bus::RedisBus;
use eval_storage::{Facade, FileBackend, FileObjectStore, RelationalBackend};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::dispatcher_client::DispatcherClient;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,eval_gateway=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = Arc::new(Config::from_env()?);
    tracing::info!(port = config.port, "starting eval-gateway");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the primary store")?;
    let primary = RelationalBackend::new(pool);
    primary.migrate().await.context("failed to run storage migrations")?;

    let secondary = FileBackend::open(&config.secondary_store_path)
        .await
        .context("failed to open the secondary file-backed store")?;
    let object_store = FileObjectStore::open(&config.object_store_path)
        .await
        .context("failed to open the object store")?;

    let facade = Arc::new(Facade::new(
        Arc::new(primary),
        Arc::new(secondary),
        Arc::new(object_store),
    ));

    let queue = Arc::new(
        RedisBroker::connect(&config.broker_url)
            .await
            .context("failed to connect to the broker")?,
    );
    let bus = Arc::new(
        RedisBus::connect(&config.redis_url)
            .await
            .context("failed to connect to the bus")?,
    );
    let dispatcher = Arc::new(DispatcherClient::new(config.dispatcher_base_url.clone()));

    let state = AppState {
        facade,
        queue,
        bus,
        dispatcher,
        config: config.clone(),
    };

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .context("failed to bind gateway listener")?;
    tracing::info!(port = config.port, "eval-gateway listening");
    axum::serve(listener, app).await.context("gateway server error")?;
    Ok(())
}
