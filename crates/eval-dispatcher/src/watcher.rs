//! Event-driven status watcher (§4.3.6): a background task that watches
//! every execution unit labelled `app=evaluation` in the namespace and
//! republishes lifecycle events on state changes.
//!
//! The cluster watch is a long-lived streaming call; it runs on its own
//! task with its own bounded channel so a stalled or reconnecting stream
//! never blocks request handling on the shared runtime (the same
//! task-plus-channel shape the bus's pub/sub subscription uses).

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, ListParams, WatchEvent};

use crate::state::AppState;

/// Request timeout on each watch call; once it elapses the stream ends
/// and the loop reconnects (§4.3.6 "restarted on stream errors or a
/// per-connection 5-minute reconnect").
const WATCH_TIMEOUT_SECONDS: u32 = 300;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Spawn the watcher task. The returned handle resolves once the task
/// exits, which only happens if its event channel closes or the task is
/// aborted by the caller.
pub fn spawn(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<JobEvent>(EVENT_CHANNEL_CAPACITY);

    let watch_state = state.clone();
    tokio::spawn(async move {
        watch_loop(watch_state, tx).await;
    });

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                JobEvent::Upserted(job) => crate::events::process_status_change(&state, &job).await,
                JobEvent::Deleted(job) => crate::events::handle_deleted(&state, &job).await,
            }
        }
        tracing::warn!("job watcher event channel closed, watcher task exiting");
    })
}

enum JobEvent {
    Upserted(Job),
    Deleted(Job),
}

async fn watch_loop(state: Arc<AppState>, tx: tokio::sync::mpsc::Sender<JobEvent>) {
    let api: Api<Job> = Api::namespaced(state.client.clone(), &state.config.namespace);
    loop {
        let params = ListParams::default()
            .labels("app=evaluation")
            .timeout(WATCH_TIMEOUT_SECONDS);

        let mut stream = match api.watch(&params, "0").await {
            Ok(stream) => stream.boxed(),
            Err(e) => {
                tracing::error!(error = %e, "failed to start job watch stream, retrying");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }
        };

        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "job watch stream item error");
                    break;
                }
            };
            let forwarded = match event {
                WatchEvent::Added(job) | WatchEvent::Modified(job) => tx.send(JobEvent::Upserted(job)).await,
                WatchEvent::Deleted(job) => tx.send(JobEvent::Deleted(job)).await,
                WatchEvent::Bookmark(_) => Ok(()),
                WatchEvent::Error(e) => {
                    tracing::warn!(error = ?e, "job watch stream reported an error event");
                    Ok(())
                }
            };
            if forwarded.is_err() {
                tracing::warn!("job watcher channel receiver dropped, stopping watch loop");
                return;
            }
        }
        tracing::info!("job watch stream ended, reconnecting");
    }
}
