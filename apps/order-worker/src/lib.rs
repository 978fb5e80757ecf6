//! Order worker wiring
//!
//! Registers one ordered listener for order events (per-customer
//! ordering) and one concurrent listener for notification fan-out, seeds
//! some demo traffic, and serves the health/metrics router until
//! interrupted.

use mq_consumer::{
    Args, HandlerError, HealthState, ListenerConfig, ListenerEndpoint, ListenerRegistry,
    MemoryBroker, OrderingMode, ParamSpec, Utf8MessageConverter, health_router, init_metrics,
};
use serde::{Deserialize, Serialize};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderEvent {
    order_id: String,
    customer: String,
    total_cents: u64,
}

async fn handle_order(args: Args) -> Result<(), HandlerError> {
    let order: OrderEvent = args.payload(0)?;
    let shard = args.text(1)?;
    info!(
        order_id = %order.order_id,
        customer = %order.customer,
        total_cents = order.total_cents,
        shard = %shard,
        "order processed"
    );
    Ok(())
}

async fn handle_notification(args: Args) -> Result<(), HandlerError> {
    let body = args.text(0)?;
    let attempt = args.uint(1)?;
    info!(body = %body, attempt = attempt, "notification sent");
    Ok(())
}

/// Run the worker until interrupted.
pub async fn run() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    init_metrics();

    let registry = Arc::new(ListenerRegistry::new());

    let orders = Arc::new(MemoryBroker::new("orders"));
    registry
        .register(
            ListenerEndpoint::new(
                ListenerConfig::new("orders", "order-workers")
                    .with_mode(OrderingMode::Ordered)
                    .with_max_retry(3)
                    .with_batch_max_size(16),
                vec![ParamSpec::Payload, ParamSpec::ShardKey],
                handle_order,
            ),
            orders.clone(),
        )
        .await?;

    let notifications = Arc::new(MemoryBroker::new("notifications"));
    registry
        .register(
            ListenerEndpoint::new(
                ListenerConfig::new("notifications", "notification-workers")
                    .with_mode(OrderingMode::Concurrent)
                    .with_thread_bounds(2, 8),
                vec![ParamSpec::Payload, ParamSpec::DeliveryAttempt],
                handle_notification,
            )
            .with_converter(Arc::new(Utf8MessageConverter)),
            notifications.clone(),
        )
        .await?;

    seed_demo_traffic(&orders, &notifications)?;

    let state = HealthState::new(registry.clone(), "order-worker", env!("CARGO_PKG_VERSION"));
    let app = health_router(state);
    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    info!("health endpoints listening on :8080");

    tokio::select! {
        result = axum::serve(listener, app).into_future() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    registry.shutdown_all(Duration::from_secs(10)).await;
    Ok(())
}

fn seed_demo_traffic(
    orders: &MemoryBroker,
    notifications: &MemoryBroker,
) -> eyre::Result<()> {
    for i in 0..12u32 {
        let event = OrderEvent {
            order_id: format!("order-{i:04}"),
            customer: format!("customer-{}", i % 3),
            total_cents: 1250 + u64::from(i) * 100,
        };
        orders.publish_json(format!("customer-{}", i % 3), &event)?;
    }
    for i in 0..6u32 {
        notifications.publish("broadcast", format!("notification {i}").into_bytes());
    }
    Ok(())
}
