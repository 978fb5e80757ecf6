//! Delivered message and batch types
//!
//! A `Message` is one delivered unit: opaque payload bytes plus broker
//! metadata. A `Batch` is an ordered sequence of messages delivered
//! together for one shard.

use chrono::{DateTime, Utc};

/// One delivered message.
///
/// Owned by the listener for the duration of one invocation; not retained
/// after a terminal decision is reached.
#[derive(Debug, Clone)]
pub struct Message {
    /// Broker-assigned message ID.
    pub message_id: String,

    /// Opaque payload bytes; interpreted by the binding's message converter.
    pub payload: Vec<u8>,

    /// Optional tag set on the message at publish time.
    pub tags: Option<String>,

    /// Shard (partition) key. Unit of ordering for ordered consumption.
    pub shard: String,

    /// Number of prior deliveries reported by the broker. Seeds the
    /// retry state so redeliveries don't reset the attempt budget.
    pub delivery_attempt: u32,

    /// When the message was enqueued.
    pub enqueued_at: DateTime<Utc>,
}

impl Message {
    /// Create a new first-delivery message.
    pub fn new(
        message_id: impl Into<String>,
        shard: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            payload,
            tags: None,
            shard: shard.into(),
            delivery_attempt: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// Set the message tags.
    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    /// Set the broker-reported delivery attempt count.
    pub fn with_delivery_attempt(mut self, attempts: u32) -> Self {
        self.delivery_attempt = attempts;
        self
    }

    /// Check if the broker has delivered this message before.
    pub fn is_redelivery(&self) -> bool {
        self.delivery_attempt > 0
    }

    /// Get how long ago the message was enqueued.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.enqueued_at
    }
}

/// An ordered sequence of messages delivered together for one shard.
///
/// For ordered consumption the shard determines strict in-batch and
/// cross-batch ordering; for concurrent consumption it is advisory only.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Topic the batch was fetched from.
    pub topic: String,

    /// Shard all messages in this batch belong to.
    pub shard: String,

    /// Messages in delivery order.
    pub messages: Vec<Message>,
}

impl Batch {
    /// Create a new batch.
    pub fn new(
        topic: impl Into<String>,
        shard: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            topic: topic.into(),
            shard: shard.into(),
            messages,
        }
    }

    /// Number of messages in the batch.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
