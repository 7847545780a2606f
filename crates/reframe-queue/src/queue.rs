//! Stage-task queue over Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::task::{Delivery, StageTask};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    /// Stream holding stage tasks
    pub stream_name: String,
    pub consumer_group: String,
    /// Dead letter stream
    pub dlq_stream_name: String,
    /// Deliveries allowed before a message is dead-lettered
    pub max_deliveries: u32,
    /// Lifetime of `(job, stage)` dedupe markers
    pub dedupe_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "reframe:tasks".to_string(),
            consumer_group: "reframe:workers".to_string(),
            dlq_stream_name: "reframe:dlq".to_string(),
            max_deliveries: 5,
            dedupe_ttl: Duration::from_secs(86_400),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("REFRAME_QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("REFRAME_QUEUE_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("REFRAME_QUEUE_DLQ")
                .unwrap_or(defaults.dlq_stream_name),
            max_deliveries: std::env::var("REFRAME_QUEUE_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_deliveries),
            dedupe_ttl: std::env::var("REFRAME_QUEUE_DEDUPE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedupe_ttl),
        }
    }
}

/// Competing-consumer queue of stage tasks.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Create streams and consumer groups as needed.
    async fn init(&self) -> QueueResult<()>;

    /// Add a task. Returns `None` when a task for the same `(job, stage)` is
    /// already queued.
    async fn enqueue(&self, task: &StageTask) -> QueueResult<Option<String>>;

    /// Read new tasks, waiting up to `block` for one to arrive.
    async fn consume(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Take over tasks another consumer has held for longer than `min_idle`.
    async fn claim_pending(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Reset the idle time of a delivery `consumer` still holds so
    /// [`TaskQueue::claim_pending`] leaves it alone. Returns `false` when the
    /// delivery was acknowledged or claimed by another consumer.
    async fn touch(&self, consumer: &str, message_id: &str) -> QueueResult<bool>;

    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    /// Move a delivery to the dead letter stream and acknowledge it.
    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()>;

    async fn len(&self) -> QueueResult<u64>;

    async fn dlq_len(&self) -> QueueResult<u64>;
}

/// Re-claim a pending entry for its current owner. JUSTID leaves the
/// delivery counter unchanged.
///
/// KEYS[1] = stream, ARGV = [group, consumer, message_id]
const TOUCH_SCRIPT: &str = r#"
local owned = redis.call('XPENDING', KEYS[1], ARGV[1], ARGV[3], ARGV[3], 1, ARGV[2])
if #owned == 0 then
  return 0
end
redis.call('XCLAIM', KEYS[1], ARGV[1], ARGV[2], 0, ARGV[3], 'JUSTID')
return 1
"#;

/// Redis Streams implementation of [`TaskQueue`].
pub struct RedisTaskQueue {
    client: redis::Client,
    config: QueueConfig,
    touch_script: Script,
}

impl RedisTaskQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            touch_script: Script::new(TOUCH_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn dedupe_key(task: &StageTask) -> String {
        format!("reframe:dedup:{}", task.idempotency_key())
    }

    /// Decode stream entries, dead-lettering undecodable ones.
    async fn decode_entries(
        &self,
        entries: Vec<redis::streams::StreamId>,
        delivery_counts: impl Fn(&str) -> u32,
    ) -> QueueResult<Vec<Delivery>> {
        let mut deliveries = Vec::new();

        for entry in entries {
            let message_id = entry.id.clone();
            let payload: Option<String> = entry.get("task");
            let decoded = payload
                .as_deref()
                .map(serde_json::from_str::<StageTask>);

            match decoded {
                Some(Ok(task)) => deliveries.push(Delivery {
                    delivery_count: delivery_counts(&message_id),
                    message_id,
                    task,
                }),
                Some(Err(e)) => {
                    warn!(message_id = %message_id, "Undecodable task payload: {}", e);
                    self.raw_dead_letter(&message_id, payload.as_deref().unwrap_or(""), &e.to_string())
                        .await?;
                }
                None => {
                    warn!(message_id = %message_id, "Stream entry without task payload");
                    self.raw_dead_letter(&message_id, "", "missing task field").await?;
                }
            }
        }

        Ok(deliveries)
    }

    async fn raw_dead_letter(&self, message_id: &str, payload: &str, error: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("task")
            .arg(payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // BUSYGROUP means the group already exists.
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn enqueue(&self, task: &StageTask) -> QueueResult<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let dedupe_key = Self::dedupe_key(task);
        let fresh: Option<String> = redis::cmd("SET")
            .arg(&dedupe_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedupe_ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        if fresh.is_none() {
            debug!(job_id = %task.job_id, stage_index = task.stage_index, "Task already queued");
            return Ok(None);
        }

        let payload = serde_json::to_string(task)?;
        let message_id: String = match redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("task")
            .arg(&payload)
            .arg("key")
            .arg(task.idempotency_key())
            .query_async(&mut conn)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                // Let a later enqueue retry.
                let _: Result<(), _> = conn.del(&dedupe_key).await;
                return Err(QueueError::enqueue(e.to_string()));
            }
        };

        info!(
            job_id = %task.job_id,
            stage_index = task.stage_index,
            message_id = %message_id,
            "Enqueued stage task"
        );
        Ok(Some(message_id))
    }

    async fn consume(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        // Dedicated connection: a blocking read would stall a shared one.
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries = reply.keys.into_iter().flat_map(|key| key.ids).collect();
        self.decode_entries(entries, |_| 1).await
    }

    async fn claim_pending(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let counts: std::collections::HashMap<String, u32> = pending
            .ids
            .iter()
            .map(|p| (p.id.clone(), p.times_delivered as u32 + 1))
            .collect();

        let mut claim = redis::cmd("XCLAIM");
        claim
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms);
        for p in &pending.ids {
            claim.arg(&p.id);
        }
        let claimed: redis::streams::StreamClaimReply = claim.query_async(&mut conn).await?;

        let deliveries = self
            .decode_entries(claimed.ids, |id| counts.get(id).copied().unwrap_or(1))
            .await?;

        let mut live = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            if delivery.delivery_count > self.config.max_deliveries {
                self.dead_letter(&delivery, "delivery limit exceeded").await?;
                continue;
            }
            info!(
                job_id = %delivery.task.job_id,
                message_id = %delivery.message_id,
                delivery_count = delivery.delivery_count,
                "Claimed pending stage task"
            );
            live.push(delivery);
        }
        Ok(live)
    }

    async fn touch(&self, consumer: &str, message_id: &str) -> QueueResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let owned: i64 = self
            .touch_script
            .key(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(message_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(owned == 1)
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged task: {}", message_id);
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let payload = serde_json::to_string(&delivery.task)?;
        self.raw_dead_letter(&delivery.message_id, &payload, error).await?;
        warn!(
            job_id = %delivery.task.job_id,
            message_id = %delivery.message_id,
            "Moved stage task to DLQ: {}",
            error
        );
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }
}
