//! Handler argument resolution
//!
//! A handler declares its parameter list as a sequence of `ParamSpec`s.
//! At registration time the `ArgumentResolverComposite` performs a dry
//! resolution: for every declared parameter it picks the **first**
//! registered resolver that claims it (first match wins, not best match)
//! and records the choice. A parameter no resolver claims is a
//! configuration error and fails registration before any message is
//! delivered. At invocation time the recorded plan turns a message into
//! concrete argument values.

use crate::convert::MessageConverter;
use crate::error::{ConsumeError, HandlerError};
use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

/// Shape of one declared handler parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamSpec {
    /// Payload decoded by the binding's message converter.
    Payload,
    /// Raw payload bytes, bypassing the converter.
    RawPayload,
    /// Broker-assigned message ID.
    MessageId,
    /// Topic the message was consumed from.
    Topic,
    /// Shard (partition) key.
    ShardKey,
    /// Message tags, if any.
    Tags,
    /// Broker-reported delivery attempt count.
    DeliveryAttempt,
    /// Enqueue timestamp.
    Timestamp,
    /// Extension point for custom resolvers registered on the composite.
    Custom(&'static str),
}

impl fmt::Display for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamSpec::Payload => write!(f, "payload"),
            ParamSpec::RawPayload => write!(f, "raw_payload"),
            ParamSpec::MessageId => write!(f, "message_id"),
            ParamSpec::Topic => write!(f, "topic"),
            ParamSpec::ShardKey => write!(f, "shard_key"),
            ParamSpec::Tags => write!(f, "tags"),
            ParamSpec::DeliveryAttempt => write!(f, "delivery_attempt"),
            ParamSpec::Timestamp => write!(f, "timestamp"),
            ParamSpec::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// A resolved argument value.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    Text(String),
    OptText(Option<String>),
    Uint(u32),
    Time(DateTime<Utc>),
}

/// The resolved argument list passed to a handler invocation.
///
/// Accessor mismatches (asking for text where the plan produced bytes)
/// are configuration defects and classified fatal.
#[derive(Debug, Clone)]
pub struct Args {
    values: Vec<ArgValue>,
}

impl Args {
    /// Wrap resolved values.
    pub fn new(values: Vec<ArgValue>) -> Self {
        Self { values }
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the argument list is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get an argument by position.
    pub fn get(&self, index: usize) -> Option<&ArgValue> {
        self.values.get(index)
    }

    fn expect(&self, index: usize) -> Result<&ArgValue, HandlerError> {
        self.values.get(index).ok_or_else(|| {
            HandlerError::fatal(format!("no argument at position {index}"))
        })
    }

    /// Get a JSON argument.
    pub fn json(&self, index: usize) -> Result<&serde_json::Value, HandlerError> {
        match self.expect(index)? {
            ArgValue::Json(v) => Ok(v),
            other => Err(type_mismatch(index, "json", other)),
        }
    }

    /// Deserialize a JSON payload argument into a typed value.
    pub fn payload<T: DeserializeOwned>(&self, index: usize) -> Result<T, HandlerError> {
        let value = self.json(index)?;
        serde_json::from_value(value.clone()).map_err(|e| {
            HandlerError::fatal(format!("payload does not match expected shape: {e}"))
        })
    }

    /// Get a raw bytes argument.
    pub fn bytes(&self, index: usize) -> Result<&[u8], HandlerError> {
        match self.expect(index)? {
            ArgValue::Bytes(b) => Ok(b),
            other => Err(type_mismatch(index, "bytes", other)),
        }
    }

    /// Get a text argument.
    pub fn text(&self, index: usize) -> Result<&str, HandlerError> {
        match self.expect(index)? {
            ArgValue::Text(t) => Ok(t),
            other => Err(type_mismatch(index, "text", other)),
        }
    }

    /// Get an optional text argument (message tags).
    pub fn opt_text(&self, index: usize) -> Result<Option<&str>, HandlerError> {
        match self.expect(index)? {
            ArgValue::OptText(t) => Ok(t.as_deref()),
            other => Err(type_mismatch(index, "optional text", other)),
        }
    }

    /// Get an unsigned integer argument.
    pub fn uint(&self, index: usize) -> Result<u32, HandlerError> {
        match self.expect(index)? {
            ArgValue::Uint(n) => Ok(*n),
            other => Err(type_mismatch(index, "uint", other)),
        }
    }

    /// Get a timestamp argument.
    pub fn time(&self, index: usize) -> Result<DateTime<Utc>, HandlerError> {
        match self.expect(index)? {
            ArgValue::Time(t) => Ok(*t),
            other => Err(type_mismatch(index, "timestamp", other)),
        }
    }
}

fn type_mismatch(index: usize, wanted: &str, got: &ArgValue) -> HandlerError {
    HandlerError::fatal(format!(
        "argument {index} is not {wanted} (resolved as {got:?})"
    ))
}

/// One resolver strategy.
///
/// Strategies are consulted in registration order; the first one whose
/// `supports` returns true for a parameter owns that parameter.
pub trait ArgumentResolver: Send + Sync {
    /// Check whether this resolver can produce the given parameter.
    fn supports(&self, param: &ParamSpec) -> bool;

    /// Produce the argument value for a delivered message.
    fn resolve(
        &self,
        param: &ParamSpec,
        topic: &str,
        message: &Message,
    ) -> Result<ArgValue, ConsumeError>;

    /// Get the resolver name for logging.
    fn name(&self) -> &'static str;
}

/// Resolves payload parameters through the binding's message converter.
pub struct PayloadArgumentResolver {
    converter: Arc<dyn MessageConverter>,
}

impl PayloadArgumentResolver {
    /// Create a payload resolver backed by a converter.
    pub fn new(converter: Arc<dyn MessageConverter>) -> Self {
        Self { converter }
    }
}

impl ArgumentResolver for PayloadArgumentResolver {
    fn supports(&self, param: &ParamSpec) -> bool {
        matches!(param, ParamSpec::Payload | ParamSpec::RawPayload)
    }

    fn resolve(
        &self,
        param: &ParamSpec,
        _topic: &str,
        message: &Message,
    ) -> Result<ArgValue, ConsumeError> {
        match param {
            ParamSpec::Payload => self.converter.convert(&message.payload),
            ParamSpec::RawPayload => Ok(ArgValue::Bytes(message.payload.clone())),
            other => Err(ConsumeError::Internal(format!(
                "payload resolver asked for unsupported parameter '{other}'"
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "payload"
    }
}

/// Resolves message metadata parameters.
pub struct HeaderArgumentResolver;

impl ArgumentResolver for HeaderArgumentResolver {
    fn supports(&self, param: &ParamSpec) -> bool {
        matches!(
            param,
            ParamSpec::MessageId
                | ParamSpec::Topic
                | ParamSpec::ShardKey
                | ParamSpec::Tags
                | ParamSpec::DeliveryAttempt
                | ParamSpec::Timestamp
        )
    }

    fn resolve(
        &self,
        param: &ParamSpec,
        topic: &str,
        message: &Message,
    ) -> Result<ArgValue, ConsumeError> {
        let value = match param {
            ParamSpec::MessageId => ArgValue::Text(message.message_id.clone()),
            ParamSpec::Topic => ArgValue::Text(topic.to_string()),
            ParamSpec::ShardKey => ArgValue::Text(message.shard.clone()),
            ParamSpec::Tags => ArgValue::OptText(message.tags.clone()),
            ParamSpec::DeliveryAttempt => ArgValue::Uint(message.delivery_attempt),
            ParamSpec::Timestamp => ArgValue::Time(message.enqueued_at),
            other => {
                return Err(ConsumeError::Internal(format!(
                    "header resolver asked for unsupported parameter '{other}'"
                )));
            }
        };
        Ok(value)
    }

    fn name(&self) -> &'static str {
        "header"
    }
}

/// Ordered set of resolver strategies with first-match dispatch.
#[derive(Clone)]
pub struct ArgumentResolverComposite {
    resolvers: Vec<Arc<dyn ArgumentResolver>>,
}

impl ArgumentResolverComposite {
    /// Create an empty composite. Useful for fully custom resolver sets.
    pub fn empty() -> Self {
        Self { resolvers: Vec::new() }
    }

    /// Create the standard composite: payload resolver first, then the
    /// metadata resolver.
    pub fn standard(converter: Arc<dyn MessageConverter>) -> Self {
        Self::empty()
            .with_resolver(Arc::new(PayloadArgumentResolver::new(converter)))
            .with_resolver(Arc::new(HeaderArgumentResolver))
    }

    /// Append a resolver. Earlier resolvers win ties.
    pub fn with_resolver(mut self, resolver: Arc<dyn ArgumentResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Find the first resolver claiming a parameter.
    pub fn find(&self, param: &ParamSpec) -> Option<usize> {
        self.resolvers.iter().position(|r| r.supports(param))
    }

    /// Dry-resolve a declared parameter list into a resolver plan.
    ///
    /// Fails with `UnresolvedParameter` for the first parameter no
    /// resolver claims.
    pub fn plan(&self, params: &[ParamSpec]) -> Result<Vec<usize>, ConsumeError> {
        params
            .iter()
            .map(|param| {
                self.find(param).ok_or_else(|| ConsumeError::UnresolvedParameter {
                    param: param.to_string(),
                })
            })
            .collect()
    }

    /// Resolve a message into concrete argument values using a plan
    /// produced by [`plan`](Self::plan).
    pub fn resolve_all(
        &self,
        plan: &[usize],
        params: &[ParamSpec],
        topic: &str,
        message: &Message,
    ) -> Result<Args, ConsumeError> {
        let mut values = Vec::with_capacity(params.len());
        for (param, &index) in params.iter().zip(plan) {
            let resolver = self.resolvers.get(index).ok_or_else(|| {
                // Defensive: the plan was validated at registration.
                ConsumeError::UnresolvedParameter {
                    param: param.to_string(),
                }
            })?;
            values.push(resolver.resolve(param, topic, message)?);
        }
        Ok(Args::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::JsonMessageConverter;

    fn composite() -> ArgumentResolverComposite {
        ArgumentResolverComposite::standard(Arc::new(JsonMessageConverter))
    }

    fn message() -> Message {
        Message::new("m-1", "shard-a", br#"{"qty": 3}"#.to_vec())
            .with_tags("created")
            .with_delivery_attempt(1)
    }

    #[test]
    fn test_plan_and_resolve() {
        let composite = composite();
        let params = vec![
            ParamSpec::Payload,
            ParamSpec::MessageId,
            ParamSpec::ShardKey,
            ParamSpec::Tags,
            ParamSpec::DeliveryAttempt,
        ];

        let plan = composite.plan(&params).unwrap();
        let args = composite
            .resolve_all(&plan, &params, "orders", &message())
            .unwrap();

        assert_eq!(args.len(), 5);
        assert_eq!(args.json(0).unwrap()["qty"], 3);
        assert_eq!(args.text(1).unwrap(), "m-1");
        assert_eq!(args.text(2).unwrap(), "shard-a");
        assert_eq!(args.opt_text(3).unwrap(), Some("created"));
        assert_eq!(args.uint(4).unwrap(), 1);
    }

    #[test]
    fn test_unresolved_parameter() {
        let composite = composite();
        let err = composite
            .plan(&[ParamSpec::Payload, ParamSpec::Custom("trace_context")])
            .unwrap_err();

        match err {
            ConsumeError::UnresolvedParameter { param } => {
                assert_eq!(param, "trace_context");
            }
            other => panic!("expected UnresolvedParameter, got {other:?}"),
        }
    }

    #[test]
    fn test_first_match_wins() {
        // A custom resolver registered before the standard ones claims
        // the payload parameter.
        struct ClaimAll;
        impl ArgumentResolver for ClaimAll {
            fn supports(&self, _param: &ParamSpec) -> bool {
                true
            }
            fn resolve(
                &self,
                _param: &ParamSpec,
                _topic: &str,
                _message: &Message,
            ) -> Result<ArgValue, ConsumeError> {
                Ok(ArgValue::Text("claimed".into()))
            }
            fn name(&self) -> &'static str {
                "claim_all"
            }
        }

        let composite = ArgumentResolverComposite::empty()
            .with_resolver(Arc::new(ClaimAll))
            .with_resolver(Arc::new(HeaderArgumentResolver));

        let params = vec![ParamSpec::MessageId];
        let plan = composite.plan(&params).unwrap();
        assert_eq!(plan, vec![0]);

        let args = composite
            .resolve_all(&plan, &params, "orders", &message())
            .unwrap();
        assert_eq!(args.text(0).unwrap(), "claimed");
    }

    #[test]
    fn test_typed_payload_accessor() {
        #[derive(serde::Deserialize)]
        struct Order {
            qty: u32,
        }

        let composite = composite();
        let params = vec![ParamSpec::Payload];
        let plan = composite.plan(&params).unwrap();
        let args = composite
            .resolve_all(&plan, &params, "orders", &message())
            .unwrap();

        let order: Order = args.payload(0).unwrap();
        assert_eq!(order.qty, 3);

        // Shape mismatch is fatal.
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Wrong {
            missing: String,
        }
        let err = args.payload::<Wrong>(0).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_accessor_mismatch_is_fatal() {
        let args = Args::new(vec![ArgValue::Uint(2)]);
        let err = args.text(0).unwrap_err();
        assert!(err.is_fatal());
    }
}
