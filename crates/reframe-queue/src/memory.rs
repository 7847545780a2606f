//! In-process task queue with the same delivery semantics as the Redis one.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{QueueError, QueueResult};
use crate::queue::TaskQueue;
use crate::task::{Delivery, StageTask};

/// A task moved to the dead letter list.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub message_id: String,
    pub task: StageTask,
    pub error: String,
}

#[derive(Debug)]
struct PendingEntry {
    task: StageTask,
    consumer: String,
    delivered_at: Instant,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<(String, StageTask)>,
    pending: HashMap<String, PendingEntry>,
    /// Idempotency key -> expiry
    dedupe: HashMap<String, Instant>,
    dead: Vec<DeadLetter>,
    next_id: u64,
}

/// Memory-backed [`TaskQueue`] for tests and single-process deployments.
pub struct MemoryTaskQueue {
    state: Mutex<State>,
    notify: Notify,
    max_deliveries: u32,
    dedupe_ttl: Duration,
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            max_deliveries: 5,
            dedupe_ttl: Duration::from_secs(86_400),
        }
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries;
        self
    }

    pub fn with_dedupe_ttl(mut self, ttl: Duration) -> Self {
        self.dedupe_ttl = ttl;
        self
    }

    /// Tasks handed out but not yet acknowledged.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means another holder panicked mid-update of
        // plain collections; the data is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_ready(&self, consumer: &str, count: usize) -> Vec<Delivery> {
        let mut state = self.lock();
        let mut out = Vec::new();
        while out.len() < count.max(1) {
            let Some((message_id, task)) = state.ready.pop_front() else {
                break;
            };
            state.pending.insert(
                message_id.clone(),
                PendingEntry {
                    task: task.clone(),
                    consumer: consumer.to_string(),
                    delivered_at: Instant::now(),
                    deliveries: 1,
                },
            );
            out.push(Delivery {
                message_id,
                task,
                delivery_count: 1,
            });
        }
        out
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn init(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn enqueue(&self, task: &StageTask) -> QueueResult<Option<String>> {
        let key = task.idempotency_key();
        let message_id = {
            let mut state = self.lock();
            let now = Instant::now();
            state.dedupe.retain(|_, expires| *expires > now);
            if state.dedupe.contains_key(&key) {
                debug!(job_id = %task.job_id, stage_index = task.stage_index, "Task already queued");
                return Ok(None);
            }
            state.dedupe.insert(key, now + self.dedupe_ttl);

            state.next_id += 1;
            let message_id = format!("{}-0", state.next_id);
            state.ready.push_back((message_id.clone(), task.clone()));
            message_id
        };

        self.notify.notify_waiters();
        Ok(Some(message_id))
    }

    async fn consume(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.take_ready(consumer, count);
            if !batch.is_empty() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn claim_pending(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut state = self.lock();
        let now = Instant::now();

        let mut idle: Vec<String> = state
            .pending
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.delivered_at) >= min_idle)
            .map(|(id, _)| id.clone())
            .collect();
        idle.sort();
        idle.truncate(count.max(1));

        let mut claimed = Vec::new();
        for message_id in idle {
            let Some(entry) = state.pending.get_mut(&message_id) else {
                continue;
            };
            entry.deliveries += 1;
            entry.delivered_at = now;
            entry.consumer = consumer.to_string();
            let delivery = Delivery {
                message_id: message_id.clone(),
                task: entry.task.clone(),
                delivery_count: entry.deliveries,
            };

            if delivery.delivery_count > self.max_deliveries {
                state.pending.remove(&message_id);
                warn!(
                    job_id = %delivery.task.job_id,
                    message_id = %message_id,
                    "Moved stage task to DLQ: delivery limit exceeded"
                );
                state.dead.push(DeadLetter {
                    message_id,
                    task: delivery.task,
                    error: "delivery limit exceeded".to_string(),
                });
                continue;
            }
            claimed.push(delivery);
        }

        Ok(claimed)
    }

    async fn touch(&self, consumer: &str, message_id: &str) -> QueueResult<bool> {
        let mut state = self.lock();
        match state.pending.get_mut(message_id) {
            Some(entry) if entry.consumer == consumer => {
                entry.delivered_at = Instant::now();
                debug!(message_id = %message_id, "Refreshed delivery lease");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        match self.lock().pending.remove(message_id) {
            Some(_) => Ok(()),
            None => Err(QueueError::UnknownDelivery(message_id.to_string())),
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut state = self.lock();
        state.pending.remove(&delivery.message_id);
        state.dead.push(DeadLetter {
            message_id: delivery.message_id.clone(),
            task: delivery.task.clone(),
            error: error.to_string(),
        });
        warn!(
            job_id = %delivery.task.job_id,
            message_id = %delivery.message_id,
            "Moved stage task to DLQ: {}",
            error
        );
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        let state = self.lock();
        Ok((state.ready.len() + state.pending.len()) as u64)
    }

    async fn dlq_len(&self) -> QueueResult<u64> {
        Ok(self.lock().dead.len() as u64)
    }
}
