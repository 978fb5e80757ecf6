//! Shared test utilities for listener testing
//!
//! This crate provides reusable test infrastructure for the consumer
//! engine and code built on it:
//! - `RecordingHandler`: a scriptable handler that records invocation
//!   and completion order, concurrency peaks, and per-message outcomes
//! - `CollectingDeadLetterSink`: captures dead-letter records for
//!   assertions
//! - `wait_until`: timeout-bounded condition polling, to avoid fixed
//!   sleeps in async tests
//!
//! # Usage
//!
//! ```rust,ignore
//! use test_utils::{wait_until, RecordingHandler};
//!
//! #[tokio::test]
//! async fn my_listener_test() {
//!     let handler = RecordingHandler::new();
//!     handler.fail_times("000000000001", 1);
//!
//!     // ... register a binding using handler.clone() ...
//!
//!     assert!(wait_until(Duration::from_secs(2), || {
//!         handler.invocations().len() >= 2
//!     })
//!     .await);
//! }
//! ```

mod handlers;
mod sink;

pub use handlers::RecordingHandler;
pub use sink::CollectingDeadLetterSink;

use std::time::Duration;

/// Poll a condition until it holds or the timeout elapses.
///
/// Returns `true` if the condition became true in time.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
