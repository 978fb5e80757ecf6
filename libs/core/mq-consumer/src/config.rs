//! Listener binding configuration
//!
//! `ListenerConfig` is the immutable descriptor of one binding: topic,
//! consumer group, ordering mode, retry limits, worker bounds, and batch
//! sizing. Created once at registration time and never mutated.

use crate::error::ConsumeError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Consumption model for a binding.
///
/// Selected once at construction; each mode is implemented by a distinct
/// listener type, so the hot path carries no mode branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderingMode {
    /// Strict in-order, single-in-flight processing per shard.
    Ordered,
    /// Parallel, unordered processing with a bounded worker pool.
    Concurrent,
}

/// Configuration for one listener binding.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Binding name, used in logs and worker naming.
    pub name: String,

    /// Topic to consume from.
    pub topic: String,

    /// Consumer group.
    pub group: String,

    /// Unique consumer instance ID (auto-generated if not provided).
    pub consumer_id: String,

    /// Optional tag filter expression (`"tagA || tagB"`). `None` or `"*"`
    /// accepts every message; non-matching messages are acked without
    /// invocation.
    pub tags: Option<String>,

    /// Consumption model.
    pub mode: OrderingMode,

    /// Per-invocation timeout. Elapsed invocations are abandoned and
    /// treated as retryable failures.
    pub invoke_timeout: Duration,

    /// Maximum retries per message before dead-lettering. Total invocation
    /// attempts never exceed `max_retry + 1`.
    pub max_retry: u32,

    /// Minimum worker count for the concurrent listener. Never torn down.
    pub thread_min: usize,

    /// Maximum worker count for the concurrent listener.
    pub thread_max: usize,

    /// Maximum messages claimed per delivery cycle.
    pub batch_max_size: usize,

    /// Base delay between in-place retries of a failed message.
    pub retry_backoff: Duration,

    /// Cap on the exponential retry backoff.
    pub retry_backoff_max: Duration,

    /// Idle period after which workers above `thread_min` are reclaimed.
    pub worker_idle_timeout: Duration,
}

impl ListenerConfig {
    /// Create a configuration for a topic and consumer group with defaults.
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Self {
        let topic = topic.into();
        let group = group.into();
        Self {
            name: format!("{}:{}", topic, group),
            topic,
            group,
            consumer_id: format!("consumer-{}", Uuid::new_v4()),
            tags: None,
            mode: OrderingMode::Concurrent,
            invoke_timeout: Duration::from_secs(15),
            max_retry: 3,
            thread_min: 4,
            thread_max: 8,
            batch_max_size: 10,
            retry_backoff: Duration::from_millis(500),
            retry_backoff_max: Duration::from_secs(30),
            worker_idle_timeout: Duration::from_secs(30),
        }
    }

    /// Set the binding name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the consumer instance ID.
    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    /// Set the tag filter expression.
    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    /// Set the consumption model.
    pub fn with_mode(mut self, mode: OrderingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the per-invocation timeout.
    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    /// Set the maximum retries per message.
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Set the worker pool bounds for the concurrent listener.
    pub fn with_thread_bounds(mut self, min: usize, max: usize) -> Self {
        self.thread_min = min;
        self.thread_max = max;
        self
    }

    /// Set the maximum messages claimed per delivery cycle.
    pub fn with_batch_max_size(mut self, size: usize) -> Self {
        self.batch_max_size = size;
        self
    }

    /// Set the base retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the retry backoff cap.
    pub fn with_retry_backoff_max(mut self, max: Duration) -> Self {
        self.retry_backoff_max = max;
        self
    }

    /// Set the idle period before surplus workers are reclaimed.
    pub fn with_worker_idle_timeout(mut self, timeout: Duration) -> Self {
        self.worker_idle_timeout = timeout;
        self
    }

    /// Validate the configuration. Called at registration; an invalid
    /// binding is rejected before any listener resources are created.
    pub fn validate(&self) -> Result<(), ConsumeError> {
        if self.topic.is_empty() {
            return Err(ConsumeError::Config("topic must not be empty".into()));
        }
        if self.group.is_empty() {
            return Err(ConsumeError::Config("group must not be empty".into()));
        }
        if self.thread_min == 0 {
            return Err(ConsumeError::Config("thread_min must be at least 1".into()));
        }
        if self.thread_min > self.thread_max {
            return Err(ConsumeError::Config(format!(
                "thread_min ({}) must not exceed thread_max ({})",
                self.thread_min, self.thread_max
            )));
        }
        if self.batch_max_size == 0 {
            return Err(ConsumeError::Config(
                "batch_max_size must be at least 1".into(),
            ));
        }
        if self.invoke_timeout.is_zero() {
            return Err(ConsumeError::Config(
                "invoke_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Check whether a message's tags pass this binding's filter.
    pub fn accepts_tags(&self, message_tags: Option<&str>) -> bool {
        let filter = match self.tags.as_deref() {
            None | Some("*") => return true,
            Some(f) => f,
        };
        let tags = match message_tags {
            Some(t) => t,
            None => return false,
        };
        filter.split("||").any(|candidate| candidate.trim() == tags)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::new("topic", "group")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ListenerConfig::new("orders", "order-workers");
        assert_eq!(config.name, "orders:order-workers");
        assert_eq!(config.mode, OrderingMode::Concurrent);
        assert_eq!(config.max_retry, 3);
        assert!(config.consumer_id.starts_with("consumer-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ListenerConfig::new("orders", "order-workers")
            .with_name("order-binding")
            .with_mode(OrderingMode::Ordered)
            .with_max_retry(5)
            .with_thread_bounds(2, 16)
            .with_batch_max_size(32);

        assert_eq!(config.name, "order-binding");
        assert_eq!(config.mode, OrderingMode::Ordered);
        assert_eq!(config.max_retry, 5);
        assert_eq!(config.thread_min, 2);
        assert_eq!(config.thread_max, 16);
        assert_eq!(config.batch_max_size, 32);
    }

    #[test]
    fn test_validation_rejects_bad_bounds() {
        let config = ListenerConfig::new("orders", "g").with_thread_bounds(8, 2);
        assert!(matches!(
            config.validate(),
            Err(ConsumeError::Config(_))
        ));

        let config = ListenerConfig::new("", "g");
        assert!(config.validate().is_err());

        let config = ListenerConfig::new("orders", "g").with_batch_max_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ordering_mode_serialization() {
        assert_eq!(OrderingMode::Ordered.to_string(), "ordered");
        assert_eq!(OrderingMode::Concurrent.as_ref(), "concurrent");

        let mode: OrderingMode = "ordered".parse().unwrap();
        assert_eq!(mode, OrderingMode::Ordered);
    }

    #[test]
    fn test_tag_filter() {
        let open = ListenerConfig::new("t", "g");
        assert!(open.accepts_tags(None));
        assert!(open.accepts_tags(Some("anything")));

        let star = ListenerConfig::new("t", "g").with_tags("*");
        assert!(star.accepts_tags(Some("anything")));

        let filtered = ListenerConfig::new("t", "g").with_tags("created || updated");
        assert!(filtered.accepts_tags(Some("created")));
        assert!(filtered.accepts_tags(Some("updated")));
        assert!(!filtered.accepts_tags(Some("deleted")));
        assert!(!filtered.accepts_tags(None));
    }
}
