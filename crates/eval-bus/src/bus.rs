use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::dlq::DlqEntry;
use crate::error::BusError;
use crate::message::Subscription;

/// Maximum number of entries retained in the DLQ's bounded list before the
/// oldest is dropped (§6 "a bounded list").
pub const DLQ_MAX_LEN: usize = 1000;

/// Pub/sub + ephemeral coordination state, as used by the Dispatcher
/// (publisher), the Reconciler (subscriber), and the Worker (ephemeral
/// job-name bookkeeping and DLQ writes).
///
/// This allows swapping between a real Redis-backed bus and a recording
/// test double without either caller knowing which is in play.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a JSON payload to a lifecycle channel
    /// (`evaluation:{queued,running,completed,failed,cancelled}`).
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BusError>;

    /// Subscribe to a channel; messages arrive until the subscription is
    /// dropped or the backend connection is lost.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError>;

    /// `job:{job}:last_state`-style plain string with a TTL.
    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError>;
    async fn get_string(&self, key: &str) -> Result<Option<String>, BusError>;

    /// `eval:{id}:running`-style hash with a TTL.
    async fn set_hash(
        &self,
        key: &str,
        value: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<(), BusError>;
    async fn get_hash(&self, key: &str) -> Result<Option<HashMap<String, String>>, BusError>;

    /// Remove any ephemeral key (string or hash) immediately.
    async fn delete(&self, key: &str) -> Result<(), BusError>;

    /// `running_evaluations`-style membership set.
    async fn set_add(&self, set_key: &str, member: &str) -> Result<(), BusError>;
    async fn set_remove(&self, set_key: &str, member: &str) -> Result<(), BusError>;
    async fn set_contains(&self, set_key: &str, member: &str) -> Result<bool, BusError>;
    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, BusError>;

    /// Append to the bounded DLQ list and its companion task-id-keyed hash.
    async fn dlq_push(&self, entry: DlqEntry) -> Result<(), BusError>;
    async fn dlq_list(&self, limit: usize) -> Result<Vec<DlqEntry>, BusError>;
    async fn dlq_len(&self) -> Result<usize, BusError>;
}
