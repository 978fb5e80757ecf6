//! Prometheus metrics for listener bindings
//!
//! Provides observability into dispatch throughput, retries, and
//! dead-letter volume.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() {
    let _ = PROMETHEUS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");
        info!("Prometheus metrics initialized");
        handle
    });
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Per-binding metrics helper
#[derive(Clone)]
pub struct ListenerMetrics {
    /// Topic for labeling
    topic: String,
    /// Consumer group for labeling
    group: String,
}

impl ListenerMetrics {
    /// Create new ListenerMetrics
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
        }
    }

    /// Record a message being received from the broker
    pub fn message_received(&self) {
        counter!(
            "mq_consumer_messages_received_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .increment(1);
    }

    /// Record a message reaching a successful terminal decision
    pub fn message_acked(&self, duration: Duration) {
        counter!(
            "mq_consumer_messages_processed_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone(),
            "status" => "success"
        )
        .increment(1);

        histogram!(
            "mq_consumer_invoke_duration_seconds",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a failed invocation
    pub fn invocation_failed(&self, kind: &'static str) {
        counter!(
            "mq_consumer_messages_processed_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone(),
            "status" => "failed"
        )
        .increment(1);

        counter!(
            "mq_consumer_invocation_errors_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone(),
            "kind" => kind
        )
        .increment(1);
    }

    /// Record an in-place retry of a message
    pub fn message_retried(&self) {
        counter!(
            "mq_consumer_messages_retried_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .increment(1);
    }

    /// Record a message moved to the dead-letter sink
    pub fn message_dead_lettered(&self) {
        counter!(
            "mq_consumer_messages_dead_lettered_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .increment(1);
    }

    /// Record a message skipped by the tag filter
    pub fn message_filtered(&self) {
        counter!(
            "mq_consumer_messages_filtered_total",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .increment(1);
    }

    /// Track one invocation entering flight
    pub fn in_flight_inc(&self) {
        gauge!(
            "mq_consumer_in_flight_invocations",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .increment(1.0);
    }

    /// Track one invocation leaving flight
    pub fn in_flight_dec(&self) {
        gauge!(
            "mq_consumer_in_flight_invocations",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .decrement(1.0);
    }

    /// Record the size of a delivered batch
    pub fn batch_size(&self, size: usize) {
        histogram!(
            "mq_consumer_batch_size",
            "topic" => self.topic.clone(),
            "group" => self.group.clone()
        )
        .record(size as f64);
    }
}
