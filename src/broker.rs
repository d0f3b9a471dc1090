use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, info};

use crate::error::BrokerError;
use crate::models::ModerationUpdate;
use crate::redis_client::RedisClient;

/// Durable submission topic consumed by the worker fleet.
pub const SUBMISSION_STREAM: &str = "content-submission";
/// Consumer group shared by all worker instances.
pub const MODERATION_GROUP: &str = "moderation-group";
/// Best-effort fan-out channel for verdict events.
pub const UPDATES_CHANNEL: &str = "moderation-updates";

const PAYLOAD_FIELD: &str = "payload";
const READ_BLOCK_MS: usize = 5000;
const READ_COUNT: usize = 10;

/// One message handed to a consumer. The id is the broker's cursor token:
/// acknowledging it advances the group cursor past this entry.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub id: String,
    pub payload: Vec<u8>,
}

/// Durable, at-least-once submission channel.
///
/// Publishing carries no partition key; distribution across consumers is
/// load balancing only, so there is no ordering guarantee across
/// submissions.
#[async_trait]
pub trait SubmissionQueue: Send + Sync {
    async fn publish(&self, payload: &[u8]) -> Result<(), BrokerError>;

    /// Join a consumer group. Each published message is delivered to exactly
    /// one live consumer in the group, with redelivery after a crash.
    async fn consumer(
        &self,
        group: &str,
        name: &str,
    ) -> Result<Box<dyn SubmissionConsumer>, BrokerError>;
}

#[async_trait]
pub trait SubmissionConsumer: Send {
    /// Wait for the next delivery. Unacknowledged deliveries from a previous
    /// run of this consumer are replayed first.
    async fn next(&mut self) -> Result<Delivery, BrokerError>;

    /// Advance the cursor past a delivery. Only call this once the
    /// delivery's side effects are durable.
    async fn ack(&mut self, delivery_id: &str) -> Result<(), BrokerError>;
}

/// Best-effort verdict fan-out: delivered to currently connected
/// subscribers only, no persistence, no replay.
#[async_trait]
pub trait UpdatePublisher: Send + Sync {
    async fn publish(&self, update: &ModerationUpdate) -> Result<(), BrokerError>;
}

/// Redis Streams implementation of the submission queue.
#[derive(Clone)]
pub struct RedisQueue {
    redis: RedisClient,
    stream: String,
}

impl RedisQueue {
    pub fn new(redis: RedisClient) -> Self {
        Self {
            redis,
            stream: SUBMISSION_STREAM.to_string(),
        }
    }
}

#[async_trait]
impl SubmissionQueue for RedisQueue {
    async fn publish(&self, payload: &[u8]) -> Result<(), BrokerError> {
        let id = self.redis.xadd(&self.stream, PAYLOAD_FIELD, payload).await?;
        debug!(entry_id = %id, "submission appended to stream");
        Ok(())
    }

    async fn consumer(
        &self,
        group: &str,
        name: &str,
    ) -> Result<Box<dyn SubmissionConsumer>, BrokerError> {
        self.redis
            .xgroup_create_mkstream(&self.stream, group)
            .await?;

        // Dedicated connection: XREADGROUP BLOCK must not share the
        // multiplexed manager connection.
        let conn = self.redis.get_client().get_async_connection().await?;
        info!(group, consumer = name, "joined consumer group");

        Ok(Box::new(RedisConsumer {
            conn,
            stream: self.stream.clone(),
            group: group.to_string(),
            name: name.to_string(),
            buffer: VecDeque::new(),
            backlog_drained: false,
        }))
    }
}

struct RedisConsumer {
    conn: redis::aio::Connection,
    stream: String,
    group: String,
    name: String,
    buffer: VecDeque<Delivery>,
    backlog_drained: bool,
}

impl RedisConsumer {
    fn buffer_reply(&mut self, reply: StreamReadReply) -> usize {
        let mut buffered = 0;
        for key in reply.keys {
            for entry in key.ids {
                let payload = entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_default();
                self.buffer.push_back(Delivery {
                    id: entry.id.clone(),
                    payload,
                });
                buffered += 1;
            }
        }
        buffered
    }
}

#[async_trait]
impl SubmissionConsumer for RedisConsumer {
    async fn next(&mut self) -> Result<Delivery, BrokerError> {
        loop {
            if let Some(delivery) = self.buffer.pop_front() {
                return Ok(delivery);
            }

            // Replay this consumer's pending entries once per session before
            // switching to new messages; that is where crash redelivery
            // comes from.
            let (start, block_ms) = if self.backlog_drained {
                (">", READ_BLOCK_MS)
            } else {
                ("0", 0)
            };

            let mut opts = StreamReadOptions::default()
                .group(&self.group, &self.name)
                .count(READ_COUNT);
            if block_ms > 0 {
                opts = opts.block(block_ms);
            }

            let reply: StreamReadReply = self
                .conn
                .xread_options(&[self.stream.as_str()], &[start], &opts)
                .await?;

            let buffered = self.buffer_reply(reply);
            if !self.backlog_drained {
                if buffered > 0 {
                    info!(
                        group = %self.group,
                        consumer = %self.name,
                        count = buffered,
                        "replaying unacknowledged deliveries"
                    );
                } else {
                    self.backlog_drained = true;
                }
            }
        }
    }

    async fn ack(&mut self, delivery_id: &str) -> Result<(), BrokerError> {
        let _: i64 = self
            .conn
            .xack(&self.stream, &self.group, &[delivery_id])
            .await?;
        Ok(())
    }
}

/// Redis pub/sub implementation of the verdict fan-out.
#[derive(Clone)]
pub struct RedisUpdatePublisher {
    redis: RedisClient,
}

impl RedisUpdatePublisher {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl UpdatePublisher for RedisUpdatePublisher {
    async fn publish(&self, update: &ModerationUpdate) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(update)?;
        self.redis.publish(UPDATES_CHANNEL, &payload).await?;
        Ok(())
    }
}

#[derive(Default)]
struct GroupState {
    cursor: usize,
    in_flight: HashMap<String, usize>,
    acked: HashSet<String>,
}

#[derive(Default)]
struct QueueState {
    entries: Vec<(String, Vec<u8>)>,
    groups: HashMap<String, GroupState>,
    next_id: u64,
}

/// In-memory submission queue implementing the same at-least-once contract
/// as `RedisQueue`, used to test the worker's ordering and idempotency
/// behavior without a live broker.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a consumer crash: every delivered-but-unacknowledged entry
    /// becomes eligible for delivery again.
    pub async fn requeue_unacked(&self, group: &str) {
        let mut state = self.state.lock().await;
        if let Some(group_state) = state.groups.get_mut(group) {
            if let Some(min_index) = group_state.in_flight.values().min().copied() {
                group_state.cursor = group_state.cursor.min(min_index);
            }
            group_state.in_flight.clear();
        }
        self.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn acked_count(&self, group: &str) -> usize {
        let state = self.state.lock().await;
        state.groups.get(group).map(|g| g.acked.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SubmissionQueue for MemoryQueue {
    async fn publish(&self, payload: &[u8]) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let id = format!("{}-0", state.next_id);
        state.next_id += 1;
        state.entries.push((id, payload.to_vec()));
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn consumer(
        &self,
        group: &str,
        _name: &str,
    ) -> Result<Box<dyn SubmissionConsumer>, BrokerError> {
        let mut state = self.state.lock().await;
        state.groups.entry(group.to_string()).or_default();
        drop(state);
        Ok(Box::new(MemoryConsumer {
            queue: self.clone(),
            group: group.to_string(),
        }))
    }
}

struct MemoryConsumer {
    queue: MemoryQueue,
    group: String,
}

#[async_trait]
impl SubmissionConsumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Delivery, BrokerError> {
        loop {
            let notified = self.queue.notify.notified();
            {
                let mut state = self.queue.state.lock().await;
                let QueueState {
                    entries, groups, ..
                } = &mut *state;
                let group_state = groups.entry(self.group.clone()).or_default();
                // Skip entries already acknowledged or currently in flight
                // (requeue_unacked may have rewound the cursor over them).
                while group_state.cursor < entries.len() {
                    let index = group_state.cursor;
                    let (id, payload) = entries[index].clone();
                    group_state.cursor += 1;
                    if group_state.acked.contains(&id)
                        || group_state.in_flight.contains_key(&id)
                    {
                        continue;
                    }
                    group_state.in_flight.insert(id.clone(), index);
                    return Ok(Delivery { id, payload });
                }
            }
            notified.await;
        }
    }

    async fn ack(&mut self, delivery_id: &str) -> Result<(), BrokerError> {
        let mut state = self.queue.state.lock().await;
        if let Some(group_state) = state.groups.get_mut(&self.group) {
            group_state.in_flight.remove(delivery_id);
            group_state.acked.insert(delivery_id.to_string());
        }
        Ok(())
    }
}

/// In-memory fan-out over a tokio broadcast channel; tests subscribe to the
/// channel directly to observe published verdict events.
#[derive(Clone)]
pub struct MemoryUpdatePublisher {
    tx: broadcast::Sender<ModerationUpdate>,
}

impl MemoryUpdatePublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModerationUpdate> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl UpdatePublisher for MemoryUpdatePublisher {
    async fn publish(&self, update: &ModerationUpdate) -> Result<(), BrokerError> {
        // No subscribers is fine: the channel has no delivery guarantee.
        let _ = self.tx.send(update.clone());
        Ok(())
    }
}
