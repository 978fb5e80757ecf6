//! In-memory broker
//!
//! A channel-of-record implementation of [`MessageSource`] for demos and
//! tests. Messages are grouped per shard, fetched as batches, and held
//! as pending until acknowledged; unacked messages are redelivered after
//! a visibility delay with an incremented delivery attempt count, the
//! way a real broker reports reconsume counts.

use crate::broker::MessageSource;
use crate::error::ConsumeError;
use crate::message::{Batch, Message};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::debug;

struct PendingDelivery {
    message: Message,
    fetched_at: Instant,
}

#[derive(Default)]
struct BrokerState {
    /// Per-shard queues of deliverable messages, in publish order.
    ready: BTreeMap<String, VecDeque<Message>>,
    /// Fetched but not yet acknowledged messages, keyed by message ID.
    pending: HashMap<String, PendingDelivery>,
}

/// In-process broker for one topic.
pub struct MemoryBroker {
    topic: String,
    fetch_wait: Duration,
    redelivery_delay: Duration,
    state: Mutex<BrokerState>,
    notify: Notify,
    seq: AtomicU64,
}

impl MemoryBroker {
    /// Create a broker for a topic.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            fetch_wait: Duration::from_millis(250),
            redelivery_delay: Duration::from_secs(30),
            state: Mutex::new(BrokerState::default()),
            notify: Notify::new(),
            seq: AtomicU64::new(1),
        }
    }

    /// Set how long an empty `fetch` blocks before returning.
    pub fn with_fetch_wait(mut self, wait: Duration) -> Self {
        self.fetch_wait = wait;
        self
    }

    /// Set the visibility delay after which unacked messages redeliver.
    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    /// Get the topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish raw payload bytes to a shard. Returns the message ID.
    pub fn publish(&self, shard: impl Into<String>, payload: Vec<u8>) -> String {
        self.publish_message(shard, payload, None)
    }

    /// Publish raw payload bytes with tags. Returns the message ID.
    pub fn publish_with_tags(
        &self,
        shard: impl Into<String>,
        payload: Vec<u8>,
        tags: impl Into<String>,
    ) -> String {
        self.publish_message(shard, payload, Some(tags.into()))
    }

    /// Publish a JSON-serialized value to a shard. Returns the message ID.
    pub fn publish_json<T: Serialize>(
        &self,
        shard: impl Into<String>,
        value: &T,
    ) -> Result<String, ConsumeError> {
        let payload = serde_json::to_vec(value)?;
        Ok(self.publish_message(shard, payload, None))
    }

    fn publish_message(
        &self,
        shard: impl Into<String>,
        payload: Vec<u8>,
        tags: Option<String>,
    ) -> String {
        let shard = shard.into();
        let id = format!("{:012}", self.seq.fetch_add(1, Ordering::SeqCst));

        let mut message = Message::new(id.clone(), shard.clone(), payload);
        message.tags = tags;

        {
            let mut state = self.state.lock().unwrap();
            state.ready.entry(shard).or_default().push_back(message);
        }
        self.notify.notify_waiters();

        debug!(topic = %self.topic, message_id = %id, "published message");
        id
    }

    /// Number of deliverable (not yet fetched) messages.
    pub fn ready_len(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.ready.values().map(|q| q.len()).sum()
    }

    /// Number of fetched but unacknowledged messages.
    pub fn pending_len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Total messages still owned by the broker.
    pub fn depth(&self) -> usize {
        self.ready_len() + self.pending_len()
    }

    /// Move pending messages past the visibility delay back to their
    /// shard queues, ahead of newer messages, with the attempt count
    /// bumped.
    fn requeue_expired(&self, state: &mut BrokerState) {
        let due: Vec<String> = state
            .pending
            .iter()
            .filter(|(_, p)| p.fetched_at.elapsed() >= self.redelivery_delay)
            .map(|(id, _)| id.clone())
            .collect();

        if due.is_empty() {
            return;
        }

        let mut redelivered: Vec<Message> = due
            .iter()
            .filter_map(|id| state.pending.remove(id))
            .map(|p| p.message)
            .collect();
        // Message IDs are zero-padded sequence numbers, so sorting
        // restores publish order.
        redelivered.sort_by(|a, b| a.message_id.cmp(&b.message_id));

        for message in redelivered.into_iter().rev() {
            let mut message = message;
            message.delivery_attempt += 1;
            state
                .ready
                .entry(message.shard.clone())
                .or_default()
                .push_front(message);
        }
    }

    fn next_redelivery_due(&self, state: &BrokerState) -> Option<Duration> {
        state
            .pending
            .values()
            .map(|p| {
                self.redelivery_delay
                    .saturating_sub(p.fetched_at.elapsed())
            })
            .min()
    }
}

#[async_trait]
impl MessageSource for MemoryBroker {
    async fn fetch(&self, max_batch: usize) -> Result<Vec<Batch>, ConsumeError> {
        let deadline = Instant::now() + self.fetch_wait;
        loop {
            let (batches, next_due) = {
                let mut state = self.state.lock().unwrap();
                self.requeue_expired(&mut state);

                let mut batches = Vec::new();
                let now = Instant::now();
                for (shard, queue) in state.ready.iter_mut() {
                    if queue.is_empty() {
                        continue;
                    }
                    let take = queue.len().min(max_batch.max(1));
                    let messages: Vec<Message> = queue.drain(..take).collect();
                    batches.push(Batch::new(self.topic.clone(), shard.clone(), messages));
                }
                state.ready.retain(|_, q| !q.is_empty());

                for batch in &batches {
                    for message in &batch.messages {
                        state.pending.insert(
                            message.message_id.clone(),
                            PendingDelivery {
                                message: message.clone(),
                                fetched_at: now,
                            },
                        );
                    }
                }

                (batches, self.next_redelivery_due(&state))
            };

            if !batches.is_empty() {
                return Ok(batches);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }

            let wait = match next_due {
                Some(due) if due < remaining => due.max(Duration::from_millis(1)),
                _ => remaining,
            };
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn ack(&self, _shard: &str, message_ids: &[String]) -> Result<(), ConsumeError> {
        let mut state = self.state.lock().unwrap();
        for id in message_ids {
            state.pending.remove(id);
        }
        Ok(())
    }
}
