//! Test utilities for gemini-proxy - in-memory and failing stores
//!
//! Records are persisted on background tasks, so tests that drive the
//! router should use [`MemoryStore::wait_for`] instead of reading the store
//! right after the response arrives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{GatewayError, Result};
use crate::interaction::InteractionRecord;
use crate::storage::InteractionStore;

/// Store that keeps every record in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<InteractionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything inserted so far, in insertion order
    pub async fn records(&self) -> Vec<InteractionRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Poll until at least `count` records exist or `timeout` elapses
    ///
    /// Returns whatever is stored at that point, so callers assert on the
    /// exact length themselves.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<InteractionRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let records = self.records().await;
            if records.len() >= count || tokio::time::Instant::now() >= deadline {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl InteractionStore for MemoryStore {
    async fn insert(&self, record: &InteractionRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Store whose every insert fails with the same message
#[derive(Debug)]
pub struct FailingStore {
    message: String,
    attempts: AtomicUsize,
}

impl FailingStore {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of inserts tried so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InteractionStore for FailingStore {
    async fn insert(&self, _record: &InteractionRecord) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(GatewayError::Storage(self.message.clone()))
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::{
        HeaderSnapshot, InteractionError, InteractionStart, LoggedBody, RequestSnapshot,
    };

    fn error_record() -> InteractionRecord {
        InteractionRecord::failed(
            &InteractionStart::now(),
            RequestSnapshot {
                method: "POST".to_string(),
                path: "/v1/foo".to_string(),
                headers: HeaderSnapshot::new(),
                body: LoggedBody::Text(String::new()),
            },
            InteractionError {
                message: "boom".to_string(),
                details: String::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_memory_store_keeps_insertion_order() {
        let store = MemoryStore::new();
        let first = error_record();
        let second = error_record();

        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let records = store.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].request_id, first.request_id);
        assert_eq!(records[1].request_id, second.request_id);
    }

    #[tokio::test]
    async fn test_wait_for_gives_up_after_timeout() {
        let store = MemoryStore::new();

        let records = store.wait_for(1, Duration::from_millis(30)).await;

        assert!(records.is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failing_store_counts_attempts() {
        let store = FailingStore::new("disk full");

        let err = store.insert(&error_record()).await.unwrap_err();

        assert!(err.to_string().contains("disk full"));
        assert_eq!(store.attempts(), 1);
    }
}
