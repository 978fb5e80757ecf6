//! Retry and dead-letter policy
//!
//! After a failed invocation the listener consults the binding's error
//! handler to decide what happens next. The default policy is bounded
//! retry with an immediate short-circuit for fatal errors. Successful
//! invocations are acked by the listener directly and never reach the
//! error handler.

use crate::error::HandlerError;
use crate::message::Message;
use tracing::warn;

/// Outcome of consulting the error handler for one failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Acknowledge the message despite the failure.
    Ack,
    /// Invoke the same message again later.
    RetryLater,
    /// Record the message in the dead-letter sink, then acknowledge it.
    DeadLetterAndAck,
}

/// Decides, per failed invocation, whether to retry, skip, or dead-letter.
///
/// `attempts` counts completed invocation attempts for this message,
/// including the one that just failed and any prior deliveries reported
/// by the broker.
pub trait ErrorHandler: Send + Sync {
    /// Decide the consequence of a failed invocation.
    fn on_error(&self, message: &Message, error: &HandlerError, attempts: u32) -> Decision;
}

/// Default policy: retry up to `max_retry` times, dead-letter on
/// exhaustion, dead-letter fatal errors immediately.
///
/// Total invocation attempts never exceed `max_retry + 1`.
#[derive(Debug, Clone)]
pub struct MaxRetryErrorHandler {
    max_retry: u32,
}

impl MaxRetryErrorHandler {
    /// Create the policy with a retry budget.
    pub fn new(max_retry: u32) -> Self {
        Self { max_retry }
    }
}

impl ErrorHandler for MaxRetryErrorHandler {
    fn on_error(&self, message: &Message, error: &HandlerError, attempts: u32) -> Decision {
        if error.is_fatal() {
            return Decision::DeadLetterAndAck;
        }
        if attempts <= self.max_retry {
            Decision::RetryLater
        } else {
            warn!(
                message_id = %message.message_id,
                shard = %message.shard,
                attempts = %attempts,
                max_retry = %self.max_retry,
                "retry budget exhausted"
            );
            Decision::DeadLetterAndAck
        }
    }
}
