//! Listener variants and the shared per-message dispatch path
//!
//! This module provides:
//! - `MessageListener` trait implemented by both consumption models
//! - `BatchOutcome` describing what happened to each message of a batch
//! - the shared drive-to-terminal-decision loop both variants run

mod concurrent;
mod orderly;
mod pool;

pub use concurrent::ConcurrentListener;
pub use orderly::OrderlyListener;

use crate::broker::{DeadLetterEntry, DeadLetterSink};
use crate::config::{ListenerConfig, OrderingMode};
use crate::error::HandlerError;
use crate::error_handler::{Decision, ErrorHandler};
use crate::handler::HandlerMethod;
use crate::message::{Batch, Message};
use crate::metrics::ListenerMetrics;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// What happened to each message of one consumed batch.
///
/// Every message ends in exactly one bucket. `abandoned` is only
/// populated during shutdown, when an invocation could not reach a
/// terminal decision; abandoned messages are not acked so the broker
/// redelivers them.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Messages acknowledged after a successful invocation (or tag skip).
    pub acked: Vec<String>,
    /// Messages recorded in the dead-letter sink, then acknowledged.
    pub dead_lettered: Vec<String>,
    /// Messages abandoned before reaching a terminal decision.
    pub abandoned: Vec<String>,
}

impl BatchOutcome {
    /// Message IDs that reached a terminal decision and must be acked.
    pub fn terminal_ids(&self) -> Vec<String> {
        self.acked
            .iter()
            .chain(self.dead_lettered.iter())
            .cloned()
            .collect()
    }
}

/// A running consumption unit for one binding.
///
/// `consume` does not return until every message of the batch has
/// reached a terminal decision (the acknowledgment boundary), except
/// when the listener is shut down mid-batch.
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// Process one delivered batch.
    async fn consume(&self, batch: Batch) -> BatchOutcome;

    /// The consumption model this listener implements.
    fn ordering_mode(&self) -> OrderingMode;

    /// Release listener-owned resources, draining for at most `grace`.
    async fn close(&self, grace: Duration);
}

/// Terminal decision for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Terminal {
    Acked,
    DeadLettered,
}

/// State shared by every worker and shard of one binding.
pub(crate) struct ListenerContext {
    pub(crate) config: ListenerConfig,
    pub(crate) handler: Arc<HandlerMethod>,
    pub(crate) error_handler: Arc<dyn ErrorHandler>,
    pub(crate) dead_letter: Arc<dyn DeadLetterSink>,
    pub(crate) metrics: ListenerMetrics,
}

impl ListenerContext {
    /// Check the binding's tag filter against a message.
    pub(crate) fn accepts(&self, message: &Message) -> bool {
        self.config.accepts_tags(message.tags.as_deref())
    }

    /// Drive one message to a terminal decision.
    ///
    /// Invokes the handler under the per-call timeout, consults the error
    /// handler on failure, and retries in place with exponential backoff
    /// until the message is acked or dead-lettered. The backoff suspends
    /// only the caller, which is the shard for the orderly listener and
    /// the worker slot for the concurrent one.
    pub(crate) async fn run_to_decision(&self, message: &Message) -> Terminal {
        let mut attempts = message.delivery_attempt;
        self.metrics.in_flight_inc();
        let terminal = self.decision_loop(message, &mut attempts).await;
        self.metrics.in_flight_dec();
        terminal
    }

    async fn decision_loop(&self, message: &Message, attempts: &mut u32) -> Terminal {
        loop {
            *attempts += 1;
            let started = Instant::now();

            let result = match tokio::time::timeout(
                self.config.invoke_timeout,
                self.handler.invoke(message),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(HandlerError::timeout(self.config.invoke_timeout)),
            };

            let err = match result {
                Ok(()) => {
                    self.metrics.message_acked(started.elapsed());
                    debug!(
                        binding = %self.config.name,
                        message_id = %message.message_id,
                        attempts = *attempts,
                        "message processed"
                    );
                    return Terminal::Acked;
                }
                Err(err) => err,
            };

            self.metrics.invocation_failed(err.kind().as_str());
            warn!(
                binding = %self.config.name,
                shard = %message.shard,
                message_id = %message.message_id,
                attempts = *attempts,
                error = %err,
                "handler invocation failed"
            );

            match self.error_handler.on_error(message, &err, *attempts) {
                Decision::Ack => return Terminal::Acked,
                Decision::RetryLater => {
                    self.metrics.message_retried();
                    let backoff = self.backoff(*attempts);
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                }
                Decision::DeadLetterAndAck => {
                    self.record_dead_letter(message, &err, *attempts).await;
                    return Terminal::DeadLettered;
                }
            }
        }
    }

    fn backoff(&self, attempts: u32) -> Duration {
        let base = self.config.retry_backoff;
        if base.is_zero() {
            return base;
        }
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        base.saturating_mul(factor).min(self.config.retry_backoff_max)
    }

    async fn record_dead_letter(&self, message: &Message, err: &HandlerError, attempts: u32) {
        let entry = DeadLetterEntry {
            message_id: message.message_id.clone(),
            topic: self.config.topic.clone(),
            group: self.config.group.clone(),
            shard: message.shard.clone(),
            payload: message.payload.clone(),
            error: err.message().to_string(),
            attempts,
            failed_at: Utc::now(),
        };

        // The message is acked either way; a sink failure must not wedge
        // the shard.
        if let Err(sink_err) = self.dead_letter.record(entry).await {
            error!(
                binding = %self.config.name,
                message_id = %message.message_id,
                error = %sink_err,
                "failed to record dead letter"
            );
        }
        self.metrics.message_dead_lettered();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{Args, ArgumentResolverComposite, ParamSpec};
    use crate::broker::LoggingDeadLetterSink;
    use crate::convert::JsonMessageConverter;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn context(max_retry: u32, target: Arc<dyn crate::handler::Handler>) -> ListenerContext {
        let config = crate::config::ListenerConfig::new("orders", "g")
            .with_max_retry(max_retry)
            .with_retry_backoff(Duration::from_millis(1))
            .with_invoke_timeout(Duration::from_millis(200));
        let resolvers = ArgumentResolverComposite::standard(Arc::new(JsonMessageConverter));
        let handler = Arc::new(
            HandlerMethod::new(
                config.name.clone(),
                config.topic.clone(),
                vec![ParamSpec::MessageId],
                resolvers,
                target,
            )
            .unwrap(),
        );
        ListenerContext {
            error_handler: Arc::new(crate::error_handler::MaxRetryErrorHandler::new(
                config.max_retry,
            )),
            dead_letter: Arc::new(LoggingDeadLetterSink),
            metrics: ListenerMetrics::new(config.topic.clone(), config.group.clone()),
            handler,
            config,
        }
    }

    #[tokio::test]
    async fn test_retry_budget_bounds_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let target = Arc::new(move |_args: Args| {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::retryable("always failing"))
            }
        });

        let ctx = context(2, target);
        let message = Message::new("m-1", "shard-a", vec![]);

        let terminal = ctx.run_to_decision(&message).await;
        assert_eq!(terminal, Terminal::DeadLettered);
        // max_retry = 2 means exactly 3 attempts.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_broker_reported_attempts_seed_retry_state() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let target = Arc::new(move |_args: Args| {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::retryable("always failing"))
            }
        });

        let ctx = context(2, target);
        // Two prior deliveries already burned the budget down.
        let message = Message::new("m-1", "shard-a", vec![]).with_delivery_attempt(2);

        let terminal = ctx.run_to_decision(&message).await;
        assert_eq!(terminal, Terminal::DeadLettered);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let target = Arc::new(move |_args: Args| {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::fatal("poison"))
            }
        });

        let ctx = context(10, target);
        let message = Message::new("m-1", "shard-a", vec![]);

        let terminal = ctx.run_to_decision(&message).await;
        assert_eq!(terminal, Terminal::DeadLettered);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_then_success() {
        let outcomes = Arc::new(Mutex::new(vec![
            Err(HandlerError::retryable("flaky")),
            Ok(()),
        ]));
        let outcomes_in = outcomes.clone();
        let target = Arc::new(move |_args: Args| {
            let outcomes = outcomes_in.clone();
            async move {
                let mut outcomes = outcomes.lock().unwrap();
                outcomes.remove(0)
            }
        });

        let ctx = context(3, target);
        let message = Message::new("m-1", "shard-a", vec![]);

        let terminal = ctx.run_to_decision(&message).await;
        assert_eq!(terminal, Terminal::Acked);
        assert!(outcomes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_consumes_retry_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let target = Arc::new(move |_args: Args| {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        });

        let mut ctx = context(1, target);
        ctx.config.invoke_timeout = Duration::from_millis(20);

        let message = Message::new("m-1", "shard-a", vec![]);
        let terminal = ctx.run_to_decision(&message).await;

        assert_eq!(terminal, Terminal::DeadLettered);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let target = Arc::new(|_args: Args| async move { Ok(()) });
        let mut ctx = context(3, target);
        ctx.config.retry_backoff = Duration::from_millis(100);
        ctx.config.retry_backoff_max = Duration::from_millis(350);

        assert_eq!(ctx.backoff(1), Duration::from_millis(100));
        assert_eq!(ctx.backoff(2), Duration::from_millis(200));
        assert_eq!(ctx.backoff(3), Duration::from_millis(350));
        assert_eq!(ctx.backoff(10), Duration::from_millis(350));
    }
}
