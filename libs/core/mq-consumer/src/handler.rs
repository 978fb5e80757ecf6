//! Handler targets and the bound handler method
//!
//! A `Handler` is the business callback bound to a topic/group. The
//! `HandlerMethod` pairs it with the argument resolution plan fixed at
//! registration time and exposes the single `invoke(message)` contract
//! used by both listener variants.

use crate::args::{Args, ArgumentResolverComposite, ParamSpec};
use crate::error::{ConsumeError, HandlerError};
use crate::message::Message;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::debug;

/// Future returned by a handler invocation.
pub type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;

/// The business callback bound to a listener.
///
/// Implemented for any `Fn(Args) -> Future` with a matching signature, so
/// plain async functions and closures work directly. Must be safe to
/// invoke concurrently from multiple workers (the concurrent listener
/// does) and repeatedly in sequence (the orderly listener does).
pub trait Handler: Send + Sync {
    /// Process one message's resolved arguments.
    fn call(&self, args: Args) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn call(&self, args: Args) -> HandlerFuture {
        Box::pin((self)(args))
    }
}

/// A handler bound to its resolved argument strategy.
///
/// Immutable after construction and shared by every delivery for the
/// binding. Construction performs the dry argument resolution; a binding
/// with an unresolvable parameter never starts.
pub struct HandlerMethod {
    name: String,
    topic: String,
    params: Vec<ParamSpec>,
    plan: Vec<usize>,
    resolvers: ArgumentResolverComposite,
    target: Arc<dyn Handler>,
}

impl std::fmt::Debug for HandlerMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerMethod")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("params", &self.params)
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl HandlerMethod {
    /// Bind a handler target to a declared parameter list.
    ///
    /// Fails with `UnresolvedParameter` when no registered resolver claims
    /// one of the declared parameters.
    pub fn new(
        name: impl Into<String>,
        topic: impl Into<String>,
        params: Vec<ParamSpec>,
        resolvers: ArgumentResolverComposite,
        target: Arc<dyn Handler>,
    ) -> Result<Self, ConsumeError> {
        let plan = resolvers.plan(&params)?;
        Ok(Self {
            name: name.into(),
            topic: topic.into(),
            params,
            plan,
            resolvers,
            target,
        })
    }

    /// Get the binding name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the handler for one message.
    ///
    /// Wraps argument resolution, the business call, and panic capture.
    /// Resolution failures are configuration or poison-payload defects and
    /// come back fatal; panics come back fatal; business errors keep their
    /// own classification. Cancellation-safe: dropping the returned future
    /// abandons the invocation, which is how the listener enforces the
    /// per-call timeout.
    pub async fn invoke(&self, message: &Message) -> Result<(), HandlerError> {
        let args = match self
            .resolvers
            .resolve_all(&self.plan, &self.params, &self.topic, message)
        {
            Ok(args) => args,
            Err(ConsumeError::Conversion(reason)) => {
                return Err(HandlerError::fatal(format!(
                    "payload conversion failed: {reason}"
                )));
            }
            Err(other) => {
                return Err(HandlerError::fatal(format!(
                    "argument resolution failed: {other}"
                )));
            }
        };

        debug!(
            binding = %self.name,
            message_id = %message.message_id,
            "invoking handler"
        );

        match AssertUnwindSafe(self.target.call(args)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::fatal(format!(
                "handler panicked: {}",
                panic_message(&panic)
            ))),
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
