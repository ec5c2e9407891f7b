//! Fire-and-forget persistence of interaction records
//!
//! The logger never reports failure to its caller: storage errors are
//! written to the operational log and the record is dropped.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::interaction::types::InteractionRecord;
use crate::storage::InteractionStore;

/// Thin adapter between the gateway and the shared interaction store
#[derive(Clone)]
pub struct InteractionLogger {
    store: Arc<dyn InteractionStore>,
}

impl InteractionLogger {
    pub fn new(store: Arc<dyn InteractionStore>) -> Self {
        Self { store }
    }

    /// Persist a record, swallowing and reporting any storage failure
    pub async fn persist(&self, record: InteractionRecord) {
        let kind = if record.is_error() { "error" } else { "success" };

        match self.store.insert(&record).await {
            Ok(()) => {
                debug!(
                    request_id = %record.request_id,
                    backend = self.store.backend(),
                    "Logged {kind} interaction"
                );
            }
            Err(e) => {
                warn!(
                    error_type = "persistence",
                    request_id = %record.request_id,
                    backend = self.store.backend(),
                    error_message = %e,
                    "Failed to save {kind} interaction, discarding record"
                );
            }
        }
    }

    /// Persist a record on a background task
    ///
    /// The returned handle is only useful to tests; production callers drop it.
    pub fn spawn_persist(&self, record: InteractionRecord) -> tokio::task::JoinHandle<()> {
        let logger = self.clone();
        tokio::spawn(async move {
            logger.persist(record).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::types::{
        HeaderSnapshot, InteractionStart, LoggedBody, RequestSnapshot, ResponseSnapshot,
    };
    use crate::testing::{FailingStore, MemoryStore};

    fn sample_record() -> InteractionRecord {
        let start = InteractionStart::now();
        InteractionRecord::completed(
            &start,
            RequestSnapshot {
                method: "GET".to_string(),
                path: "/v1beta/models".to_string(),
                headers: HeaderSnapshot::new(),
                body: LoggedBody::Text(String::new()),
            },
            ResponseSnapshot {
                status: 200,
                headers: HeaderSnapshot::new(),
                body: LoggedBody::Text("ok".to_string()),
            },
            true,
        )
    }

    #[tokio::test]
    async fn test_persist_writes_to_store() {
        let store = Arc::new(MemoryStore::new());
        let logger = InteractionLogger::new(store.clone());
        let record = sample_record();

        logger.persist(record.clone()).await;

        assert_eq!(store.records().await, vec![record]);
    }

    #[tokio::test]
    async fn test_persist_swallows_store_failure() {
        let store = Arc::new(FailingStore::new("disk full"));
        let logger = InteractionLogger::new(store.clone());

        logger.persist(sample_record()).await;

        assert_eq!(store.attempts(), 1);
    }

    #[tokio::test]
    async fn test_spawn_persist_runs_in_background() {
        let store = Arc::new(MemoryStore::new());
        let logger = InteractionLogger::new(store.clone());

        logger.spawn_persist(sample_record()).await.unwrap();

        assert_eq!(store.len().await, 1);
    }
}
