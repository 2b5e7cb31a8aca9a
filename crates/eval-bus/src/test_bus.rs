//! In-memory [`Bus`] double for unit tests, mirroring the recording-mock
//! pattern used elsewhere in this codebase for external substrates.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::bus::{Bus, DLQ_MAX_LEN};
use crate::dlq::DlqEntry;
use crate::error::BusError;
use crate::message::{BusMessage, Subscription};

/// A published message, recorded for later inspection.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub channel: String,
    pub payload: Bytes,
}

/// A test double for [`Bus`] that records every call instead of talking to
/// Redis. TTLs are accepted but never expire entries; tests that care about
/// expiry should assert on `delete` having been called instead.
#[derive(Default)]
pub struct InMemoryBus {
    published: RwLock<Vec<PublishedMessage>>,
    subscriptions: RwLock<Vec<String>>,
    subscribers: RwLock<HashMap<String, Vec<tokio::sync::mpsc::Sender<BusMessage>>>>,
    strings: RwLock<HashMap<String, String>>,
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
    sets: RwLock<HashMap<String, Vec<String>>>,
    dlq: RwLock<Vec<DlqEntry>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn messages_for_channel(&self, channel: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.channel == channel)
            .cloned()
            .collect()
    }

    pub fn was_published_to(&self, channel: &str) -> bool {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|m| m.channel == channel)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn was_subscribed_to(&self, channel: &str) -> bool {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|c| c == channel)
    }

    pub fn clear(&self) {
        self.published.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.subscriptions.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.strings.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.hashes.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.sets.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.dlq.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BusError> {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage { channel: channel.to_string(), payload: payload.clone() });

        if let Some(senders) = self.subscribers.read().unwrap_or_else(|e| e.into_inner()).get(channel) {
            for sender in senders {
                let _ = sender
                    .send(BusMessage { channel: channel.to_string(), payload: payload.clone() })
                    .await;
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(channel.to_string());

        let (tx, rx) = tokio::sync::mpsc::channel(256);
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(channel.to_string())
            .or_default()
            .push(tx);

        Ok(Subscription { receiver: rx })
    }

    async fn set_string(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), BusError> {
        self.strings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>, BusError> {
        Ok(self.strings.read().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
    }

    async fn set_hash(
        &self,
        key: &str,
        value: HashMap<String, String>,
        _ttl: Duration,
    ) -> Result<(), BusError> {
        self.hashes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get_hash(&self, key: &str) -> Result<Option<HashMap<String, String>>, BusError> {
        Ok(self.hashes.read().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), BusError> {
        self.strings.write().unwrap_or_else(|e| e.into_inner()).remove(key);
        self.hashes.write().unwrap_or_else(|e| e.into_inner()).remove(key);
        Ok(())
    }

    async fn set_add(&self, set_key: &str, member: &str) -> Result<(), BusError> {
        let mut sets = self.sets.write().unwrap_or_else(|e| e.into_inner());
        let members = sets.entry(set_key.to_string()).or_default();
        if !members.iter().any(|m| m == member) {
            members.push(member.to_string());
        }
        Ok(())
    }

    async fn set_remove(&self, set_key: &str, member: &str) -> Result<(), BusError> {
        if let Some(members) = self.sets.write().unwrap_or_else(|e| e.into_inner()).get_mut(set_key) {
            members.retain(|m| m != member);
        }
        Ok(())
    }

    async fn set_contains(&self, set_key: &str, member: &str) -> Result<bool, BusError> {
        Ok(self
            .sets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(set_key)
            .map(|members| members.iter().any(|m| m == member))
            .unwrap_or(false))
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, BusError> {
        Ok(self
            .sets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(set_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn dlq_push(&self, entry: DlqEntry) -> Result<(), BusError> {
        let mut dlq = self.dlq.write().unwrap_or_else(|e| e.into_inner());
        dlq.insert(0, entry);
        dlq.truncate(DLQ_MAX_LEN);
        Ok(())
    }

    async fn dlq_list(&self, limit: usize) -> Result<Vec<DlqEntry>, BusError> {
        let dlq = self.dlq.read().unwrap_or_else(|e| e.into_inner());
        Ok(dlq.iter().take(limit).cloned().collect())
    }

    async fn dlq_len(&self) -> Result<usize, BusError> {
        Ok(self.dlq.read().unwrap_or_else(|e| e.into_inner()).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_is_recorded_and_forwarded_to_subscribers() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("evaluation:queued").await.unwrap();

        bus.publish("evaluation:queued", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        assert!(bus.was_published_to("evaluation:queued"));
        let received = sub.recv().await.unwrap();
        assert_eq!(received.channel, "evaluation:queued");
    }

    #[tokio::test]
    async fn ephemeral_string_round_trips() {
        let bus = InMemoryBus::new();
        bus.set_string("job:foo:last_state", "Running", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            bus.get_string("job:foo:last_state").await.unwrap(),
            Some("Running".to_string())
        );

        bus.delete("job:foo:last_state").await.unwrap();
        assert_eq!(bus.get_string("job:foo:last_state").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_membership_tracks_running_evaluations() {
        let bus = InMemoryBus::new();
        bus.set_add("running_evaluations", "eval-1").await.unwrap();
        bus.set_add("running_evaluations", "eval-1").await.unwrap();
        bus.set_add("running_evaluations", "eval-2").await.unwrap();

        assert!(bus.set_contains("running_evaluations", "eval-1").await.unwrap());
        assert_eq!(bus.set_members("running_evaluations").await.unwrap().len(), 2);

        bus.set_remove("running_evaluations", "eval-1").await.unwrap();
        assert!(!bus.set_contains("running_evaluations", "eval-1").await.unwrap());
    }

    #[tokio::test]
    async fn dlq_push_is_bounded_and_newest_first() {
        let bus = InMemoryBus::new();
        for i in 0..3 {
            bus.dlq_push(DlqEntry {
                task_id: format!("task-{i}"),
                name: "evaluate_code".to_string(),
                evaluation_id: format!("eval-{i}"),
                args: serde_json::json!([]),
                exception_class: "RuntimeError".to_string(),
                traceback: "...".to_string(),
                retries: 5,
                metadata: Default::default(),
            })
            .await
            .unwrap();
        }

        assert_eq!(bus.dlq_len().await.unwrap(), 3);
        let entries = bus.dlq_list(10).await.unwrap();
        assert_eq!(entries[0].task_id, "task-2");
    }
}
