//! Redis-backed implementation of [`Bus`].
//!
//! Pub/sub and ephemeral key/value/set operations have different connection
//! lifetimes: a subscription holds its connection open for as long as the
//! caller keeps reading, while ephemeral ops are short request/response
//! round trips. We use a dedicated `redis::Client` connection per
//! subscription and a pooled `bb8-redis` connection for everything else.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::{bb8, RedisConnectionManager};
use bytes::Bytes;
use futures_util::StreamExt;
use redis::AsyncCommands;

use crate::bus::{Bus, DLQ_MAX_LEN};
use crate::dlq::DlqEntry;
use crate::error::BusError;
use crate::message::{BusMessage, Subscription};

const DLQ_LIST_KEY: &str = "dlq:entries";
const DLQ_HASH_KEY: &str = "dlq:by_task_id";

pub struct RedisBus {
    pubsub_client: redis::Client,
    pool: bb8::Pool<RedisConnectionManager>,
}

impl RedisBus {
    pub async fn connect(redis_url: &str) -> Result<Self, BusError> {
        let pubsub_client = redis::Client::open(redis_url)
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        let manager = RedisConnectionManager::new(redis_url)
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        let pool = bb8::Pool::builder()
            .build(manager)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        Ok(Self { pubsub_client, pool })
    }

    async fn conn(&self) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>, BusError> {
        self.pool
            .get()
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BusError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .publish(channel, payload.as_ref())
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        let client = self.pubsub_client.clone();
        let channel = channel.to_string();
        let (tx, rx) = tokio::sync::mpsc::channel(256);

        let pubsub_conn = client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        tokio::spawn(async move {
            let mut pubsub = pubsub_conn;
            if pubsub.subscribe(&channel).await.is_err() {
                return;
            }
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let bus_msg = BusMessage {
                    channel: msg.get_channel_name().to_string(),
                    payload: Bytes::from(msg.get_payload_bytes().to_vec()),
                };
                if tx.send(bus_msg).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription { receiver: rx })
    }

    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>, BusError> {
        let mut conn = self.conn().await?;
        conn.get(key)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))
    }

    async fn set_hash(
        &self,
        key: &str,
        value: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<(), BusError> {
        let mut conn = self.conn().await?;
        let pairs: Vec<(String, String)> = value.into_iter().collect();
        let _: () = conn
            .hset_multiple(key, &pairs)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        let _: () = conn
            .expire(key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_hash(&self, key: &str) -> Result<Option<HashMap<String, String>>, BusError> {
        let mut conn = self.conn().await?;
        let map: HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        Ok(if map.is_empty() { None } else { Some(map) })
    }

    async fn delete(&self, key: &str) -> Result<(), BusError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn set_add(&self, set_key: &str, member: &str) -> Result<(), BusError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .sadd(set_key, member)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn set_remove(&self, set_key: &str, member: &str) -> Result<(), BusError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .srem(set_key, member)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn set_contains(&self, set_key: &str, member: &str) -> Result<bool, BusError> {
        let mut conn = self.conn().await?;
        conn.sismember(set_key, member)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, BusError> {
        let mut conn = self.conn().await?;
        conn.smembers(set_key)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))
    }

    async fn dlq_push(&self, entry: DlqEntry) -> Result<(), BusError> {
        let mut conn = self.conn().await?;
        let serialized = serde_json::to_string(&entry)?;
        let _: () = conn
            .lpush(DLQ_LIST_KEY, &serialized)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        let _: () = conn
            .ltrim(DLQ_LIST_KEY, 0, DLQ_MAX_LEN as isize - 1)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        let _: () = conn
            .hset(DLQ_HASH_KEY, &entry.task_id, &serialized)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn dlq_list(&self, limit: usize) -> Result<Vec<DlqEntry>, BusError> {
        let mut conn = self.conn().await?;
        let raw: Vec<String> = conn
            .lrange(DLQ_LIST_KEY, 0, limit.max(1) as isize - 1)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        raw.iter()
            .map(|s| serde_json::from_str(s).map_err(BusError::from))
            .collect()
    }

    async fn dlq_len(&self) -> Result<usize, BusError> {
        let mut conn = self.conn().await?;
        conn.llen(DLQ_LIST_KEY)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))
    }
}
