//! Endpoint registry and listener factory
//!
//! `ListenerRegistry` turns a `ListenerEndpoint` into a running
//! consumption unit: it validates the binding, performs the dry argument
//! resolution (fail fast, before any message is delivered), selects the
//! listener variant from the ordering mode, and spawns the delivery loop
//! that moves batches from the broker source into the listener.

use crate::args::{ArgumentResolverComposite, ParamSpec};
use crate::broker::{DeadLetterSink, LoggingDeadLetterSink, MessageSource};
use crate::config::{ListenerConfig, OrderingMode};
use crate::error::ConsumeError;
use crate::error_handler::{ErrorHandler, MaxRetryErrorHandler};
use crate::handler::{Handler, HandlerMethod};
use crate::listener::{ConcurrentListener, ListenerContext, MessageListener, OrderlyListener};
use crate::metrics::ListenerMetrics;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

/// One declared listener binding: configuration plus the handler target
/// and its argument strategy.
pub struct ListenerEndpoint {
    config: ListenerConfig,
    params: Vec<ParamSpec>,
    target: Arc<dyn Handler>,
    converter: Arc<dyn crate::convert::MessageConverter>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    resolvers: Option<ArgumentResolverComposite>,
}

impl ListenerEndpoint {
    /// Declare a binding. The handler's parameter list is resolved and
    /// validated at registration time.
    pub fn new(
        config: ListenerConfig,
        params: Vec<ParamSpec>,
        target: impl Handler + 'static,
    ) -> Self {
        Self {
            config,
            params,
            target: Arc::new(target),
            converter: Arc::new(crate::convert::JsonMessageConverter),
            error_handler: None,
            resolvers: None,
        }
    }

    /// Replace the default JSON message converter.
    pub fn with_converter(
        mut self,
        converter: Arc<dyn crate::convert::MessageConverter>,
    ) -> Self {
        self.converter = converter;
        self
    }

    /// Replace the default max-retry error handler.
    pub fn with_error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(error_handler);
        self
    }

    /// Replace the standard resolver composite.
    pub fn with_resolvers(mut self, resolvers: ArgumentResolverComposite) -> Self {
        self.resolvers = Some(resolvers);
        self
    }

    /// Get the binding configuration.
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }
}

/// Registered-binding summary for health and admin endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BindingInfo {
    pub name: String,
    pub topic: String,
    pub group: String,
    pub mode: OrderingMode,
}

struct RunningListener {
    config: ListenerConfig,
    listener: Arc<dyn MessageListener>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns every running listener, keyed by `(topic, group)`.
pub struct ListenerRegistry {
    bindings: tokio::sync::Mutex<HashMap<(String, String), RunningListener>>,
    dead_letter: Arc<dyn DeadLetterSink>,
}

impl ListenerRegistry {
    /// Create a registry with the logging dead-letter sink.
    pub fn new() -> Self {
        Self::with_dead_letter_sink(Arc::new(LoggingDeadLetterSink))
    }

    /// Create a registry with a custom dead-letter sink.
    pub fn with_dead_letter_sink(sink: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            bindings: tokio::sync::Mutex::new(HashMap::new()),
            dead_letter: sink,
        }
    }

    /// Register a binding and start its listener.
    ///
    /// Fails fast on invalid configuration, on a duplicate `(topic,
    /// group)` binding (the first registration is unaffected), and on a
    /// handler parameter no resolver claims — all before any message is
    /// delivered.
    pub async fn register(
        &self,
        endpoint: ListenerEndpoint,
        source: Arc<dyn MessageSource>,
    ) -> Result<(), ConsumeError> {
        endpoint.config.validate()?;
        let config = endpoint.config.clone();
        let key = (config.topic.clone(), config.group.clone());

        let mut bindings = self.bindings.lock().await;
        if bindings.contains_key(&key) {
            return Err(ConsumeError::DuplicateBinding {
                topic: config.topic,
                group: config.group,
            });
        }

        let resolvers = endpoint.resolvers.unwrap_or_else(|| {
            ArgumentResolverComposite::standard(endpoint.converter.clone())
        });
        let handler = Arc::new(HandlerMethod::new(
            config.name.clone(),
            config.topic.clone(),
            endpoint.params,
            resolvers,
            endpoint.target,
        )?);

        let error_handler = endpoint
            .error_handler
            .unwrap_or_else(|| Arc::new(MaxRetryErrorHandler::new(config.max_retry)));

        let ctx = Arc::new(ListenerContext {
            metrics: ListenerMetrics::new(config.topic.clone(), config.group.clone()),
            dead_letter: Arc::clone(&self.dead_letter),
            error_handler,
            handler,
            config: config.clone(),
        });

        let listener: Arc<dyn MessageListener> = match config.mode {
            OrderingMode::Ordered => Arc::new(OrderlyListener::new(ctx)),
            OrderingMode::Concurrent => Arc::new(ConcurrentListener::new(ctx)),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(delivery_loop(
            config.clone(),
            Arc::clone(&listener),
            source,
            shutdown_rx,
        ));

        info!(
            topic = %config.topic,
            group = %config.group,
            mode = %config.mode,
            "listener registered"
        );

        bindings.insert(
            key,
            RunningListener {
                config,
                listener,
                shutdown: shutdown_tx,
                handle,
            },
        );
        Ok(())
    }

    /// Stop and remove one binding.
    ///
    /// In-flight invocations get `grace` to finish; past that they are
    /// abandoned and reported, and their messages are left unacked for
    /// the broker to redeliver.
    pub async fn deregister(
        &self,
        topic: &str,
        group: &str,
        grace: Duration,
    ) -> Result<(), ConsumeError> {
        let running = {
            let mut bindings = self.bindings.lock().await;
            bindings
                .remove(&(topic.to_string(), group.to_string()))
                .ok_or_else(|| ConsumeError::UnknownBinding {
                    topic: topic.to_string(),
                    group: group.to_string(),
                })?
        };
        stop_listener(running, grace).await;
        Ok(())
    }

    /// Stop every binding, draining each for at most `grace`.
    pub async fn shutdown_all(&self, grace: Duration) {
        let drained: Vec<RunningListener> = {
            let mut bindings = self.bindings.lock().await;
            bindings.drain().map(|(_, running)| running).collect()
        };

        let mut join_set = JoinSet::new();
        for running in drained {
            join_set.spawn(stop_listener(running, grace));
        }
        while join_set.join_next().await.is_some() {}
    }

    /// Summaries of every registered binding.
    pub async fn bindings(&self) -> Vec<BindingInfo> {
        let bindings = self.bindings.lock().await;
        let mut infos: Vec<BindingInfo> = bindings
            .values()
            .map(|running| BindingInfo {
                name: running.config.name.clone(),
                topic: running.config.topic.clone(),
                group: running.config.group.clone(),
                mode: running.config.mode,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Number of registered bindings.
    pub async fn len(&self) -> usize {
        self.bindings.lock().await.len()
    }

    /// Check whether any binding is registered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn stop_listener(running: RunningListener, grace: Duration) {
    let RunningListener {
        config,
        listener,
        shutdown,
        mut handle,
    } = running;

    let _ = shutdown.send(true);

    match tokio::time::timeout(grace, &mut handle).await {
        Ok(_) => {
            listener.close(grace).await;
            info!(topic = %config.topic, group = %config.group, "listener stopped");
        }
        Err(_) => {
            handle.abort();
            listener.close(Duration::ZERO).await;
            warn!(
                topic = %config.topic,
                group = %config.group,
                "shutdown grace exceeded; in-flight invocations abandoned"
            );
        }
    }
}

/// Moves batches from the broker source into the listener until shut
/// down. Control never returns to the source for a new fetch before
/// every message of the previous fetch reached a terminal decision.
async fn delivery_loop(
    config: ListenerConfig,
    listener: Arc<dyn MessageListener>,
    source: Arc<dyn MessageSource>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        consumer_id = %config.consumer_id,
        topic = %config.topic,
        group = %config.group,
        mode = %config.mode,
        batch_max_size = %config.batch_max_size,
        "starting delivery loop"
    );

    let mut consecutive_errors: u32 = 0;
    const MAX_BACKOFF_SECS: u64 = 30;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let fetched = tokio::select! {
            _ = shutdown.changed() => continue,
            fetched = source.fetch(config.batch_max_size) => fetched,
        };

        let batches = match fetched {
            Ok(batches) => {
                if consecutive_errors > 0 {
                    info!("broker recovered after {} errors", consecutive_errors);
                    consecutive_errors = 0;
                }
                batches
            }
            Err(e) => {
                consecutive_errors += 1;
                let backoff_secs =
                    std::cmp::min(2u64.pow(consecutive_errors.min(5)), MAX_BACKOFF_SECS);
                warn!(
                    error = %e,
                    consecutive_errors = %consecutive_errors,
                    backoff_secs = %backoff_secs,
                    "broker fetch failed, backing off"
                );
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                }
                continue;
            }
        };

        if batches.is_empty() {
            continue;
        }

        // Shards run in parallel; the orderly listener's shard locks
        // still serialize same-shard batches.
        let mut join_set = JoinSet::new();
        for batch in batches {
            let listener = Arc::clone(&listener);
            let source = Arc::clone(&source);
            join_set.spawn(async move {
                let shard = batch.shard.clone();
                let outcome = listener.consume(batch).await;

                let terminal = outcome.terminal_ids();
                if !terminal.is_empty() {
                    if let Err(e) = source.ack(&shard, &terminal).await {
                        error!(shard = %shard, error = %e, "failed to ack batch");
                    }
                }
                if !outcome.abandoned.is_empty() {
                    warn!(
                        shard = %shard,
                        count = outcome.abandoned.len(),
                        "messages left unacked after abandonment"
                    );
                }
            });
        }
        while join_set.join_next().await.is_some() {}
    }

    info!(topic = %config.topic, group = %config.group, "delivery loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Args;

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = ListenerRegistry::new();
        assert!(registry.is_empty().await);
        assert!(registry.bindings().await.is_empty());
    }

    #[tokio::test]
    async fn test_deregister_unknown_binding() {
        let registry = ListenerRegistry::new();
        let err = registry
            .deregister("orders", "nobody", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumeError::UnknownBinding { .. }));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_start() {
        let registry = ListenerRegistry::new();
        let source = Arc::new(crate::memory::MemoryBroker::new("orders"));
        let config = ListenerConfig::new("orders", "g").with_thread_bounds(4, 1);
        let endpoint = ListenerEndpoint::new(
            config,
            vec![ParamSpec::MessageId],
            |_args: Args| async move { Ok(()) },
        );

        let err = registry.register(endpoint, source).await.unwrap_err();
        assert!(matches!(err, ConsumeError::Config(_)));
        assert!(registry.is_empty().await);
    }
}
