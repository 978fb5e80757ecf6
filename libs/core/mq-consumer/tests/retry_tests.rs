//! Integration tests for the retry and dead-letter policy: bounded
//! attempts, fatal short-circuit, and timeout handling.

use mq_consumer::{ListenerConfig, ListenerEndpoint, ListenerRegistry, MemoryBroker, OrderingMode};
use std::sync::Arc;
use std::time::Duration;
use test_utils::{CollectingDeadLetterSink, RecordingHandler, wait_until};

fn ordered_config(topic: &str) -> ListenerConfig {
    ListenerConfig::new(topic, "test-group")
        .with_mode(OrderingMode::Ordered)
        .with_retry_backoff(Duration::from_millis(5))
        .with_invoke_timeout(Duration::from_secs(2))
}

fn broker(topic: &str) -> Arc<MemoryBroker> {
    Arc::new(MemoryBroker::new(topic).with_fetch_wait(Duration::from_millis(10)))
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_dead_letter_after_max_retry_plus_one_attempts() {
    let broker = broker("orders");
    let id = broker.publish("shard-1", b"{}".to_vec());

    let handler = RecordingHandler::new();
    handler.fail_always(&id, false);

    let sink = CollectingDeadLetterSink::new();
    let registry = ListenerRegistry::with_dead_letter_sink(Arc::new(sink.clone()));
    registry
        .register(
            ListenerEndpoint::new(
                ordered_config("orders").with_max_retry(2),
                RecordingHandler::params(),
                handler.clone(),
            ),
            broker.clone(),
        )
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || sink.len() == 1).await);
    registry.shutdown_all(Duration::from_secs(1)).await;

    // max_retry = 2 means exactly 3 attempts.
    assert_eq!(handler.invocation_count(&id), 3);

    let entries = sink.entries();
    assert_eq!(entries[0].message_id, id);
    assert_eq!(entries[0].shard, "shard-1");
    assert_eq!(entries[0].attempts, 3);
    assert!(entries[0].error.contains("scripted failure"));

    // Dead-lettered messages are still acked, never redelivered.
    assert_eq!(broker.depth(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn fatal_error_dead_letters_on_first_attempt() {
    let broker = broker("orders");
    let id = broker.publish("shard-1", b"{}".to_vec());

    let handler = RecordingHandler::new();
    handler.fail_always(&id, true);

    let sink = CollectingDeadLetterSink::new();
    let registry = ListenerRegistry::with_dead_letter_sink(Arc::new(sink.clone()));
    registry
        .register(
            ListenerEndpoint::new(
                ordered_config("orders").with_max_retry(5),
                RecordingHandler::params(),
                handler.clone(),
            ),
            broker.clone(),
        )
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || sink.len() == 1).await);
    registry.shutdown_all(Duration::from_secs(1)).await;

    // The remaining retry budget is irrelevant for fatal errors.
    assert_eq!(handler.invocation_count(&id), 1);
    assert_eq!(sink.entries()[0].attempts, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_out_invocations_are_retried_then_dead_lettered() {
    let broker = broker("orders");
    let id = broker.publish("shard-1", b"{}".to_vec());

    let handler = RecordingHandler::new().with_delay(Duration::from_millis(500));

    let sink = CollectingDeadLetterSink::new();
    let registry = ListenerRegistry::with_dead_letter_sink(Arc::new(sink.clone()));
    registry
        .register(
            ListenerEndpoint::new(
                ordered_config("orders")
                    .with_max_retry(1)
                    .with_invoke_timeout(Duration::from_millis(50)),
                RecordingHandler::params(),
                handler.clone(),
            ),
            broker.clone(),
        )
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(3), || sink.len() == 1).await);
    registry.shutdown_all(Duration::from_secs(1)).await;

    // One attempt plus one retry, both timing out.
    assert_eq!(handler.invocation_count(&id), 2);
    assert!(sink.entries()[0].error.contains("timed out"));
}

#[tokio::test(flavor = "multi_thread")]
async fn successful_messages_never_reach_the_sink() {
    let broker = broker("orders");
    broker.publish("shard-1", b"{}".to_vec());
    broker.publish("shard-2", b"{}".to_vec());

    let handler = RecordingHandler::new();
    let sink = CollectingDeadLetterSink::new();
    let registry = ListenerRegistry::with_dead_letter_sink(Arc::new(sink.clone()));
    registry
        .register(
            ListenerEndpoint::new(
                ordered_config("orders"),
                RecordingHandler::params(),
                handler.clone(),
            ),
            broker.clone(),
        )
        .await
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || handler.completions().len() >= 2).await
    );
    assert!(wait_until(Duration::from_secs(2), || broker.depth() == 0).await);
    registry.shutdown_all(Duration::from_secs(1)).await;

    assert!(sink.is_empty());
}
