//! Listener Binding & Dispatch Engine
//!
//! A broker-agnostic framework for turning declarative listener bindings
//! into running message consumers.
//!
//! ## Features
//!
//! - **Two consumption models**: strictly ordered per-shard delivery
//!   (`OrderlyListener`) or freely concurrent delivery on a bounded
//!   worker pool (`ConcurrentListener`), selected per binding
//! - **Argument resolution**: handlers declare a parameter list; a
//!   first-match resolver table is validated at registration time
//! - **Bounded retry**: per-message retry budget with exponential
//!   backoff and an immediate short-circuit for fatal errors
//! - **Dead letter sink**: exhausted and poison messages are recorded,
//!   then acked, so nothing is silently dropped or redelivered forever
//! - **Prometheus metrics** and health endpoints
//! - **Graceful shutdown**: deregistration drains in-flight invocations
//!   before releasing worker resources
//!
//! ## Example
//!
//! ```ignore
//! use mq_consumer::{
//!     Args, HandlerError, ListenerConfig, ListenerEndpoint, ListenerRegistry,
//!     MemoryBroker, OrderingMode, ParamSpec,
//! };
//!
//! async fn handle_order(args: Args) -> Result<(), HandlerError> {
//!     let order: Order = args.payload(0)?;
//!     let shard = args.text(1)?;
//!     // ... business code ...
//!     Ok(())
//! }
//!
//! let broker = Arc::new(MemoryBroker::new("orders"));
//! let registry = ListenerRegistry::new();
//!
//! let config = ListenerConfig::new("orders", "order-workers")
//!     .with_mode(OrderingMode::Ordered)
//!     .with_max_retry(3);
//!
//! let endpoint = ListenerEndpoint::new(
//!     config,
//!     vec![ParamSpec::Payload, ParamSpec::ShardKey],
//!     handle_order,
//! );
//!
//! registry.register(endpoint, broker.clone()).await?;
//! ```

mod args;
mod broker;
mod config;
mod convert;
mod error;
mod error_handler;
mod handler;
mod health;
mod listener;
mod memory;
mod message;
pub mod metrics;
mod registry;

// Re-export main types
pub use args::{
    ArgValue, Args, ArgumentResolver, ArgumentResolverComposite, HeaderArgumentResolver,
    ParamSpec, PayloadArgumentResolver,
};
pub use broker::{DeadLetterEntry, DeadLetterSink, LoggingDeadLetterSink, MessageSource};
pub use config::{ListenerConfig, OrderingMode};
pub use convert::{JsonMessageConverter, MessageConverter, Utf8MessageConverter};
pub use error::{ConsumeError, ErrorKind, HandlerError};
pub use error_handler::{Decision, ErrorHandler, MaxRetryErrorHandler};
pub use handler::{Handler, HandlerFuture, HandlerMethod};
pub use health::{HealthState, health_router};
pub use listener::{BatchOutcome, ConcurrentListener, MessageListener, OrderlyListener};
pub use memory::MemoryBroker;
pub use message::{Batch, Message};
pub use metrics::{ListenerMetrics, init_metrics};
pub use registry::{BindingInfo, ListenerEndpoint, ListenerRegistry};
