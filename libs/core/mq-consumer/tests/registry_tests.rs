//! Integration tests for the endpoint registry: duplicate bindings,
//! fail-fast validation, tag filtering, and graceful shutdown.

use mq_consumer::{
    ConsumeError, ListenerConfig, ListenerEndpoint, ListenerRegistry, MemoryBroker, OrderingMode,
    ParamSpec,
};
use std::sync::Arc;
use std::time::Duration;
use test_utils::{RecordingHandler, wait_until};

fn ordered_config(topic: &str) -> ListenerConfig {
    ListenerConfig::new(topic, "test-group")
        .with_mode(OrderingMode::Ordered)
        .with_retry_backoff(Duration::from_millis(5))
        .with_invoke_timeout(Duration::from_secs(5))
}

fn broker(topic: &str) -> Arc<MemoryBroker> {
    Arc::new(MemoryBroker::new(topic).with_fetch_wait(Duration::from_millis(10)))
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_binding_is_rejected_and_first_registration_survives() {
    let broker = broker("orders");
    let handler = RecordingHandler::new();

    let registry = ListenerRegistry::new();
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

    let err = registry
        .register(
            ListenerEndpoint::new(
                ordered_config("orders"),
                RecordingHandler::params(),
                RecordingHandler::new(),
            ),
            broker.clone(),
        )
        .await
        .unwrap_err();

    match err {
        ConsumeError::DuplicateBinding { topic, group } => {
            assert_eq!(topic, "orders");
            assert_eq!(group, "test-group");
        }
        other => panic!("expected DuplicateBinding, got {other:?}"),
    }
    assert_eq!(registry.len().await, 1);

    // The first binding keeps consuming.
    let id = broker.publish("shard-1", b"{}".to_vec());
    assert!(
        wait_until(Duration::from_secs(2), || {
            handler.invocations().contains(&id)
        })
        .await
    );
    registry.shutdown_all(Duration::from_secs(1)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unresolved_parameter_fails_registration_before_any_delivery() {
    let broker = broker("orders");
    broker.publish("shard-1", b"{}".to_vec());

    let handler = RecordingHandler::new();
    let registry = ListenerRegistry::new();

    let err = registry
        .register(
            ListenerEndpoint::new(
                ordered_config("orders"),
                vec![ParamSpec::Custom("session_context")],
                handler.clone(),
            ),
            broker.clone(),
        )
        .await
        .unwrap_err();

    match err {
        ConsumeError::UnresolvedParameter { param } => {
            assert_eq!(param, "session_context");
        }
        other => panic!("expected UnresolvedParameter, got {other:?}"),
    }
    assert!(registry.is_empty().await);

    // The failed binding never consumed anything.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handler.invocations().is_empty());
    assert_eq!(broker.ready_len() + broker.pending_len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn tag_filter_acks_non_matching_messages_without_invocation() {
    let broker = broker("orders");
    let spam = broker.publish_with_tags("shard-1", b"{}".to_vec(), "spam");
    let important = broker.publish_with_tags("shard-1", b"{}".to_vec(), "important");

    let handler = RecordingHandler::new();
    let registry = ListenerRegistry::new();
    registry
        .register(
            ListenerEndpoint::new(
                ordered_config("orders").with_tags("important || critical"),
                RecordingHandler::params(),
                handler.clone(),
            ),
            broker.clone(),
        )
        .await
        .unwrap();

    // Both messages reach a terminal decision (filtered ones are acked).
    assert!(wait_until(Duration::from_secs(2), || broker.depth() == 0).await);
    registry.shutdown_all(Duration::from_secs(1)).await;

    let invocations = handler.invocations();
    assert!(invocations.contains(&important));
    assert!(!invocations.contains(&spam));
}

#[tokio::test(flavor = "multi_thread")]
async fn deregister_drains_in_flight_invocations() {
    let broker = broker("orders");
    broker.publish("shard-1", b"{}".to_vec());

    let handler = RecordingHandler::new().with_delay(Duration::from_millis(100));
    let registry = ListenerRegistry::new();
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
        wait_until(Duration::from_secs(2), || handler.invocations().len() == 1).await
    );

    registry
        .deregister("orders", "test-group", Duration::from_secs(2))
        .await
        .unwrap();

    // The in-flight invocation finished and its message was acked.
    assert_eq!(handler.completions().len(), 1);
    assert_eq!(broker.depth(), 0);
    assert!(registry.is_empty().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_past_grace_abandons_in_flight_invocations() {
    let broker = broker("orders");
    broker.publish("shard-1", b"{}".to_vec());

    let handler = RecordingHandler::new().with_delay(Duration::from_secs(30));
    let registry = ListenerRegistry::new();
    registry
        .register(
            ListenerEndpoint::new(
                ordered_config("orders").with_invoke_timeout(Duration::from_secs(60)),
                RecordingHandler::params(),
                handler.clone(),
            ),
            broker.clone(),
        )
        .await
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || handler.invocations().len() == 1).await
    );

    registry
        .deregister("orders", "test-group", Duration::from_millis(50))
        .await
        .unwrap();

    // The invocation was abandoned; its message stays with the broker
    // for redelivery.
    assert!(handler.completions().is_empty());
    assert_eq!(broker.pending_len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn redelivered_messages_carry_their_attempt_count_into_the_budget() {
    let broker = Arc::new(
        MemoryBroker::new("orders")
            .with_fetch_wait(Duration::from_millis(10))
            .with_redelivery_delay(Duration::from_millis(50)),
    );
    let id = broker.publish("shard-1", b"{}".to_vec());

    // Sleeps past the shutdown grace so the first delivery is abandoned.
    let handler = RecordingHandler::new().with_delay(Duration::from_secs(30));
    let registry = ListenerRegistry::new();
    registry
        .register(
            ListenerEndpoint::new(
                ordered_config("orders").with_invoke_timeout(Duration::from_secs(60)),
                RecordingHandler::params(),
                handler.clone(),
            ),
            broker.clone(),
        )
        .await
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || handler.invocations().len() == 1).await
    );
    registry
        .deregister("orders", "test-group", Duration::from_millis(20))
        .await
        .unwrap();

    // Wait for the visibility delay, then fetch directly: the broker
    // reports the redelivery in the attempt count.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let batches = mq_consumer::MessageSource::fetch(broker.as_ref(), 10)
        .await
        .unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].messages[0].message_id, id);
    assert_eq!(batches[0].messages[0].delivery_attempt, 1);
}
