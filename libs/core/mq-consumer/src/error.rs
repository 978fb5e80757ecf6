//! Error types and invocation-failure classification
//!
//! Errors live on two layers:
//! - `ConsumeError` for registration-time and infrastructure failures
//! - `HandlerError` for per-invocation failures, classified as either
//!   **Retryable** (retried within the binding's retry budget) or
//!   **Fatal** (dead-lettered immediately)

use std::time::Duration;
use thiserror::Error;

/// Classification of a failed handler invocation.
///
/// The classification drives the error handler's decision: retryable
/// failures consume retry budget, fatal failures short-circuit straight
/// to the dead-letter sink regardless of remaining budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Recoverable failure (business error, timeout, transient resource issue).
    Retryable,
    /// Unrecoverable failure (poison payload, configuration defect, panic).
    Fatal,
}

impl ErrorKind {
    /// Label used for metrics and structured logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Retryable => "retryable",
            ErrorKind::Fatal => "fatal",
        }
    }
}

/// Error raised by a single handler invocation.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    kind: ErrorKind,
}

impl HandlerError {
    /// Create a retryable invocation error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::Retryable,
        }
    }

    /// Create a fatal invocation error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::Fatal,
        }
    }

    /// Create the error reported when an invocation exceeds the binding's
    /// per-call timeout. Timeouts are retryable.
    pub fn timeout(limit: Duration) -> Self {
        Self::retryable(format!("invocation timed out after {}ms", limit.as_millis()))
    }

    /// Get the error classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Check whether this error short-circuits the retry budget.
    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Fatal
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Engine errors surfaced outside the per-message path.
///
/// Configuration-time errors (`UnresolvedParameter`, `DuplicateBinding`,
/// `Config`) abort registration of the offending binding only; other
/// bindings are unaffected.
#[derive(Error, Debug)]
pub enum ConsumeError {
    /// Payload could not be interpreted as the target type.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// No registered resolver claims a declared handler parameter.
    #[error("no resolver for handler parameter '{param}'")]
    UnresolvedParameter { param: String },

    /// A listener is already bound for this topic and consumer group.
    #[error("listener already bound for topic '{topic}' group '{group}'")]
    DuplicateBinding { topic: String, group: String },

    /// No listener is bound for this topic and consumer group.
    #[error("no listener bound for topic '{topic}' group '{group}'")]
    UnknownBinding { topic: String, group: String },

    /// Invalid binding configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Broker client failure (fetch or acknowledge).
    #[error("broker error: {0}")]
    Broker(String),

    /// The engine is shutting down and no longer accepts work.
    #[error("shutdown in progress")]
    Shutdown,

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ConsumeError {
    fn from(err: serde_json::Error) -> Self {
        ConsumeError::Conversion(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let retryable = HandlerError::retryable("downstream unavailable");
        assert_eq!(retryable.kind(), ErrorKind::Retryable);
        assert!(!retryable.is_fatal());

        let fatal = HandlerError::fatal("schema mismatch");
        assert!(fatal.is_fatal());
        assert_eq!(fatal.kind().as_str(), "fatal");
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = HandlerError::timeout(Duration::from_millis(250));
        assert_eq!(err.kind(), ErrorKind::Retryable);
        assert!(err.message().contains("250ms"));
    }

    #[test]
    fn test_serde_error_maps_to_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let consume: ConsumeError = err.into();
        assert!(matches!(consume, ConsumeError::Conversion(_)));
    }
}
