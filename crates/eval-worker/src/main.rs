//! Worker (C2): consumes work items from the broker, enforces the
//! capacity/retry/DLQ state machine, and calls the Dispatcher.

mod config;
mod consumer;
mod dispatcher_client;
mod error;
mod retry;

use std::sync::Arc;

use anyhow::{Context, Result};
use eval_broker::RedisBroker;
use eval_bus::RedisBus;
use eval_storage::{Facade, FileBackend, FileObjectStore, RelationalBackend};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::consumer::Consumer;
use crate::dispatcher_client::DispatcherClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,eval_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = Arc::new(Config::from_env()?);
    tracing::info!(concurrency = config.concurrency, "starting eval-worker");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the primary store")?;
    let primary = RelationalBackend::new(pool);

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

    let consumer = Arc::new(Consumer {
        facade,
        queue,
        bus,
        dispatcher,
        config: config.clone(),
    });

    tracing::info!(concurrency = config.concurrency, "eval-worker consumers starting");
    let mut handles = Vec::with_capacity(config.concurrency);
    for id in 0..config.concurrency {
        let consumer = consumer.clone();
        handles.push(tokio::spawn(async move {
            tracing::debug!(consumer_id = id, "consumer task started");
            consumer.run().await;
        }));
    }

    for handle in handles {
        handle.await.context("consumer task panicked")?;
    }
    Ok(())
}
