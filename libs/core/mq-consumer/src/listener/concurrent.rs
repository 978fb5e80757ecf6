//! Concurrent listener
//!
//! Processes deliveries on a bounded worker pool with no cross-message
//! ordering guarantee. Each message is driven to a terminal decision
//! independently; a retrying message suspends only its own worker slot,
//! never the rest of the batch — including other messages of the same
//! shard.

use super::pool::WorkerPool;
use super::{BatchOutcome, ListenerContext, MessageListener, Terminal};
use crate::config::OrderingMode;
use crate::message::Batch;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, warn};

pub struct ConcurrentListener {
    ctx: Arc<ListenerContext>,
    pool: WorkerPool,
}

impl ConcurrentListener {
    pub(crate) fn new(ctx: Arc<ListenerContext>) -> Self {
        let pool = WorkerPool::new(
            ctx.config.name.clone(),
            ctx.config.thread_min,
            ctx.config.thread_max,
            ctx.config.worker_idle_timeout,
        );
        Self { ctx, pool }
    }

    /// Number of live pool workers. Exposed for tests.
    pub fn live_workers(&self) -> usize {
        self.pool.live_workers()
    }
}

#[async_trait]
impl MessageListener for ConcurrentListener {
    async fn consume(&self, batch: Batch) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if batch.is_empty() {
            return outcome;
        }
        self.ctx.metrics.batch_size(batch.len());

        let mut replies = Vec::with_capacity(batch.messages.len());
        for message in batch.messages {
            self.ctx.metrics.message_received();

            if !self.ctx.accepts(&message) {
                self.ctx.metrics.message_filtered();
                outcome.acked.push(message.message_id.clone());
                continue;
            }

            let message_id = message.message_id.clone();
            let (done_tx, done_rx) = oneshot::channel();
            let ctx = Arc::clone(&self.ctx);

            let submitted = self
                .pool
                .submit(Box::pin(async move {
                    let terminal = ctx.run_to_decision(&message).await;
                    let _ = done_tx.send(terminal);
                }))
                .await;

            match submitted {
                Ok(()) => replies.push((message_id, done_rx)),
                Err(e) => {
                    // Pool is closing; the message stays unacked for the
                    // broker to redeliver.
                    warn!(
                        binding = %self.ctx.config.name,
                        message_id = %message_id,
                        error = %e,
                        "could not submit message to worker pool"
                    );
                    outcome.abandoned.push(message_id);
                }
            }
        }

        for (message_id, done_rx) in replies {
            match done_rx.await {
                Ok(Terminal::Acked) => outcome.acked.push(message_id),
                Ok(Terminal::DeadLettered) => outcome.dead_lettered.push(message_id),
                Err(_) => {
                    // Worker aborted during shutdown before the message
                    // reached a terminal decision.
                    error!(
                        binding = %self.ctx.config.name,
                        message_id = %message_id,
                        "invocation abandoned during shutdown"
                    );
                    outcome.abandoned.push(message_id);
                }
            }
        }

        outcome
    }

    fn ordering_mode(&self) -> OrderingMode {
        OrderingMode::Concurrent
    }

    async fn close(&self, grace: Duration) {
        let aborted = self.pool.close(grace).await;
        if aborted > 0 {
            error!(
                binding = %self.ctx.config.name,
                aborted = aborted,
                "worker pool closed with invocations still in flight"
            );
        }
    }
}
