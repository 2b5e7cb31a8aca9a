//! Reconciler (C4): the serialization point for evaluation lifecycle
//! state. Subscribes to the lifecycle channels the Dispatcher and Worker
//! publish to, reduces each event into the durable record, and cleans up
//! the bus-scoped ephemeral state terminal events leave behind.

mod config;
mod handlers;

use std::sync::Arc;

use anyhow::{Context, Result};
use eval_bus::RedisBus;
use eval_storage::{Facade, FileBackend, FileObjectStore, RelationalBackend};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::handlers::Reconciler;

/// One subscription loop per channel (§5 "C4 runs one subscription loop
/// per channel, processing messages sequentially per channel; cross-
/// channel concurrency is allowed").
const CHANNELS: &[&str] = &[
    "evaluation:queued",
    "evaluation:running",
    "evaluation:completed",
    "evaluation:failed",
    "evaluation:cancelled",
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,eval_reconciler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = Config::from_env()?;
    tracing::info!("starting eval-reconciler");

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
    let bus = Arc::new(
        RedisBus::connect(&config.redis_url)
            .await
            .context("failed to connect to the bus")?,
    );

    let reconciler = Arc::new(Reconciler { facade, bus: bus.clone() });

    let mut handles = Vec::with_capacity(CHANNELS.len());
    for &channel in CHANNELS {
        let reconciler = reconciler.clone();
        let bus = bus.clone();
        handles.push(tokio::spawn(async move {
            subscription_loop(channel, reconciler, bus.as_ref()).await;
        }));
    }

    tracing::info!(channels = CHANNELS.len(), "eval-reconciler subscription loops started");
    for handle in handles {
        handle.await.context("subscription loop panicked")?;
    }
    Ok(())
}

/// Subscribe to one channel and process messages sequentially for as long
/// as the subscription stays open, reconnecting on drop (a dropped
/// subscription only happens if the bus connection itself is lost).
async fn subscription_loop(channel: &str, reconciler: Arc<Reconciler>, bus: &dyn eval_bus::Bus) {
    loop {
        let mut subscription = match bus.subscribe(channel).await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::error!(channel, error = %e, "failed to subscribe, retrying");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                continue;
            }
        };
        tracing::info!(channel, "subscribed");

        while let Some(message) = subscription.recv().await {
            reconciler.handle(&message.channel, &message.payload).await;
        }

        tracing::warn!(channel, "subscription closed, resubscribing");
    }
}
