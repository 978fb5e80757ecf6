//! Scriptable recording handler
//!
//! `RecordingHandler` stands in for business code in listener tests. It
//! records the order invocations start and finish, tracks the peak
//! number of concurrent invocations, and fails on demand per message.

use mq_consumer::{Args, Handler, HandlerError, HandlerFuture, ParamSpec};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum Script {
    /// Fail the next `remaining` invocations with a retryable error.
    FailTimes { remaining: u32 },
    /// Fail every invocation.
    AlwaysFail { fatal: bool },
}

/// Handler double that records everything the listener does to it.
///
/// Expects the binding to declare [`RecordingHandler::params`] so the
/// first argument is the message ID and the second the shard key.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    invocations: Arc<Mutex<Vec<String>>>,
    completions: Arc<Mutex<Vec<String>>>,
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    delay: Duration,
}

impl RecordingHandler {
    /// Create a handler that succeeds instantly for every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every invocation take at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The parameter list bindings using this handler must declare.
    pub fn params() -> Vec<ParamSpec> {
        vec![ParamSpec::MessageId, ParamSpec::ShardKey]
    }

    /// Fail the next `times` invocations of a message with a retryable
    /// error, then succeed.
    pub fn fail_times(&self, message_id: &str, times: u32) {
        self.scripts
            .lock()
            .unwrap()
            .insert(message_id.to_string(), Script::FailTimes { remaining: times });
    }

    /// Fail every invocation of a message.
    pub fn fail_always(&self, message_id: &str, fatal: bool) {
        self.scripts
            .lock()
            .unwrap()
            .insert(message_id.to_string(), Script::AlwaysFail { fatal });
    }

    /// Message IDs in the order invocations started.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }

    /// Message IDs in the order invocations finished.
    pub fn completions(&self) -> Vec<String> {
        self.completions.lock().unwrap().clone()
    }

    /// How many times a message was invoked.
    pub fn invocation_count(&self, message_id: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|id| *id == message_id)
            .count()
    }

    /// Highest number of invocations observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl Handler for RecordingHandler {
    fn call(&self, args: Args) -> HandlerFuture {
        let invocations = self.invocations.clone();
        let completions = self.completions.clone();
        let scripts = self.scripts.clone();
        let in_flight = self.in_flight.clone();
        let peak_in_flight = self.peak_in_flight.clone();
        let delay = self.delay;

        Box::pin(async move {
            let id = args.text(0)?.to_string();
            invocations.lock().unwrap().push(id.clone());

            let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak_in_flight.fetch_max(current, Ordering::SeqCst);

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);

            let result = {
                let mut scripts = scripts.lock().unwrap();
                match scripts.get_mut(&id) {
                    Some(Script::FailTimes { remaining }) if *remaining > 0 => {
                        *remaining -= 1;
                        Err(HandlerError::retryable("scripted failure"))
                    }
                    Some(Script::AlwaysFail { fatal: true }) => {
                        Err(HandlerError::fatal("scripted fatal failure"))
                    }
                    Some(Script::AlwaysFail { fatal: false }) => {
                        Err(HandlerError::retryable("scripted failure"))
                    }
                    _ => Ok(()),
                }
            };

            completions.lock().unwrap().push(id);
            result
        })
    }
}
