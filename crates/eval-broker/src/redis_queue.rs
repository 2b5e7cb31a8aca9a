//! Redis-backed [`WorkQueue`]: a reliable-queue pattern (`BRPOPLPUSH` into a
//! processing list) plus a delayed-retry sorted set, since Redis has no
//! native visibility timeout or delayed delivery primitive.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bb8_redis::{bb8, RedisConnectionManager};
use redis::AsyncCommands;

use crate::error::BrokerError;
use crate::queue::{Reservation, WorkQueue};
use crate::work_item::WorkItem;

const READY_KEY: &str = "broker:ready";
const PROCESSING_KEY: &str = "broker:processing";
const DELAYED_KEY: &str = "broker:delayed";
/// Upper bound on how many due delayed items are promoted per `reserve`
/// call, so one noisy backlog can't starve the blocking pop.
const PROMOTE_BATCH: isize = 50;

pub struct RedisBroker {
    pool: bb8::Pool<RedisConnectionManager>,
}

impl RedisBroker {
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        let manager = RedisConnectionManager::new(redis_url)
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        let pool = bb8::Pool::builder()
            .build(manager)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>, BrokerError> {
        self.pool
            .get()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))
    }

    /// Move any delayed items whose delay has elapsed back onto the ready
    /// list. Best-effort: called at the start of every `reserve`.
    async fn promote_due(&self) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        let now_ms = now_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(DELAYED_KEY, 0, now_ms, 0, PROMOTE_BATCH)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        for raw in due {
            let _: () = conn
                .zrem(DELAYED_KEY, &raw)
                .await
                .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
            let _: () = conn
                .lpush(READY_KEY, &raw)
                .await
                .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        }
        Ok(())
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[async_trait]
impl WorkQueue for RedisBroker {
    async fn enqueue(&self, item: WorkItem) -> Result<(), BrokerError> {
        let raw = serde_json::to_string(&item)?;
        let mut conn = self.conn().await?;
        let _: () = conn
            .lpush(READY_KEY, raw)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn reserve(&self, wait: Duration) -> Result<Option<Reservation>, BrokerError> {
        self.promote_due().await?;
        let mut conn = self.conn().await?;
        let popped: Option<String> = conn
            .brpoplpush(READY_KEY, PROCESSING_KEY, wait.as_secs_f64())
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        let Some(raw) = popped else {
            return Ok(None);
        };
        let item: WorkItem = serde_json::from_str(&raw)?;
        Ok(Some(Reservation { item, raw }))
    }

    async fn ack(&self, reservation: &Reservation) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .lrem(PROCESSING_KEY, 1, &reservation.raw)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn nack_with_delay(
        &self,
        reservation: Reservation,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .lrem(PROCESSING_KEY, 1, &reservation.raw)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        let updated_raw = serde_json::to_string(&reservation.item)?;
        let score = now_millis() + delay.as_millis() as i64;
        let _: () = conn
            .zadd(DELAYED_KEY, updated_raw, score)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn dead_letter(&self, reservation: Reservation) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .lrem(PROCESSING_KEY, 1, &reservation.raw)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn depth(&self) -> Result<usize, BrokerError> {
        let mut conn = self.conn().await?;
        conn.llen(READY_KEY)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))
    }
}
