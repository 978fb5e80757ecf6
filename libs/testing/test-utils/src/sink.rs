//! Collecting dead-letter sink
//!
//! Captures every dead-letter record in memory so tests can assert on
//! attempts, shards, and failure reasons.

use async_trait::async_trait;
use mq_consumer::{ConsumeError, DeadLetterEntry, DeadLetterSink};
use std::sync::{Arc, Mutex};

/// Dead-letter sink that keeps every entry.
#[derive(Clone, Default)]
pub struct CollectingDeadLetterSink {
    entries: Arc<Mutex<Vec<DeadLetterEntry>>>,
}

impl CollectingDeadLetterSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded entries.
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Check whether nothing was dead-lettered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterSink for CollectingDeadLetterSink {
    async fn record(&self, entry: DeadLetterEntry) -> Result<(), ConsumeError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}
