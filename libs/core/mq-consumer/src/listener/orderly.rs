//! Orderly listener
//!
//! Processes one shard's batches strictly in delivery order. A per-shard
//! async mutex guarantees that no two invocations for the same shard are
//! ever in flight concurrently, in-batch or across batches. A retryable
//! failure halts the shard on the failing message until it reaches a
//! terminal decision; skipping ahead would reorder the shard.

use super::{BatchOutcome, ListenerContext, MessageListener, Terminal};
use crate::config::OrderingMode;
use crate::message::Batch;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub struct OrderlyListener {
    ctx: Arc<ListenerContext>,
    shard_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OrderlyListener {
    pub(crate) fn new(ctx: Arc<ListenerContext>) -> Self {
        Self {
            ctx,
            shard_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn shard_lock(&self, shard: &str) -> Arc<Mutex<()>> {
        let mut locks = self.shard_locks.lock().unwrap();
        locks
            .entry(shard.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl MessageListener for OrderlyListener {
    async fn consume(&self, batch: Batch) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if batch.is_empty() {
            return outcome;
        }
        self.ctx.metrics.batch_size(batch.len());

        // Single in-flight invocation per shard, across batches too.
        let lock = self.shard_lock(&batch.shard);
        let _guard = lock.lock().await;

        for message in &batch.messages {
            self.ctx.metrics.message_received();

            if !self.ctx.accepts(message) {
                self.ctx.metrics.message_filtered();
                outcome.acked.push(message.message_id.clone());
                continue;
            }

            match self.ctx.run_to_decision(message).await {
                Terminal::Acked => outcome.acked.push(message.message_id.clone()),
                Terminal::DeadLettered => {
                    outcome.dead_lettered.push(message.message_id.clone());
                }
            }
        }

        outcome
    }

    fn ordering_mode(&self) -> OrderingMode {
        OrderingMode::Ordered
    }

    async fn close(&self, _grace: Duration) {
        // In-flight work is owned by the delivery loop; nothing to drain.
    }
}
