//! Broker boundary traits and the dead-letter record
//!
//! The engine does not speak any wire protocol. It consumes batches from
//! a `MessageSource` and resolves every message into an acknowledgment
//! decision; exhausted and poison messages are handed to a
//! `DeadLetterSink` before being acked.

use crate::error::ConsumeError;
use crate::message::Batch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

/// The broker client handoff.
///
/// `fetch` is the blocking (long-poll) delivery path: it returns batches
/// keyed by shard, or an empty vector after the source's wait period.
/// The delivery loop never fetches again before every message of the
/// previous fetch has reached a terminal decision.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Fetch the next batches, at most `max_batch` messages per shard.
    async fn fetch(&self, max_batch: usize) -> Result<Vec<Batch>, ConsumeError>;

    /// Acknowledge messages of one shard so they are not redelivered.
    async fn ack(&self, shard: &str, message_ids: &[String]) -> Result<(), ConsumeError>;
}

/// Terminal record for a message that exhausted its retries or failed
/// fatally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Broker-assigned message ID.
    pub message_id: String,

    /// Topic the message was consumed from.
    pub topic: String,

    /// Consumer group of the binding.
    pub group: String,

    /// Shard the message belonged to.
    pub shard: String,

    /// Original payload bytes.
    pub payload: Vec<u8>,

    /// Error message of the final failed invocation.
    pub error: String,

    /// Total invocation attempts made.
    pub attempts: u32,

    /// When the message was dead-lettered.
    pub failed_at: DateTime<Utc>,
}

/// Destination for dead-lettered messages.
///
/// Transports (streams, tables, queues) are external concerns; the
/// engine only guarantees every dead-lettered message passes through
/// exactly one `record` call before being acked.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Record one dead-lettered message.
    async fn record(&self, entry: DeadLetterEntry) -> Result<(), ConsumeError>;
}

/// Default sink: emits a structured error event and drops the message.
pub struct LoggingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for LoggingDeadLetterSink {
    async fn record(&self, entry: DeadLetterEntry) -> Result<(), ConsumeError> {
        error!(
            topic = %entry.topic,
            group = %entry.group,
            shard = %entry.shard,
            message_id = %entry.message_id,
            attempts = %entry.attempts,
            error = %entry.error,
            "message dead-lettered"
        );
        Ok(())
    }
}
