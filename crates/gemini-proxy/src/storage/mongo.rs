//! MongoDB interaction store
//!
//! Each record becomes one document in the configured collection. The
//! `timestamp` field is stored as a native BSON date so the collection can be
//! queried and sorted by time.

use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{self, Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};

use crate::error::{GatewayError, Result};
use crate::interaction::InteractionRecord;
use crate::storage::InteractionStore;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MongoStore {
    collection: Collection<Document>,
}

impl MongoStore {
    /// Build a client and check connectivity
    ///
    /// An unreachable server is reported but not fatal: the driver keeps
    /// retrying server selection on every insert, and failed inserts are
    /// swallowed by the interaction logger.
    pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| GatewayError::Storage(format!("Invalid MongoDB URI: {e}")))?;
        options.app_name = Some("gemini-proxy".to_string());

        let client = Client::with_options(options)
            .map_err(|e| GatewayError::Storage(format!("Failed to create MongoDB client: {e}")))?;
        let db = client.database(database);

        match tokio::time::timeout(PING_TIMEOUT, db.run_command(doc! { "ping": 1 })).await {
            Ok(Ok(_)) => tracing::info!("MongoDB connected successfully"),
            Ok(Err(e)) => tracing::warn!("Could not connect to MongoDB: {e}"),
            Err(_) => tracing::warn!(
                "Could not connect to MongoDB: no reply within {}s",
                PING_TIMEOUT.as_secs()
            ),
        }

        Ok(Self {
            collection: db.collection::<Document>(collection),
        })
    }

    /// Convert a record into the document that gets inserted
    pub fn to_document(record: &InteractionRecord) -> Result<Document> {
        let mut document = bson::to_document(record)
            .map_err(|e| GatewayError::Serialization(format!("Failed to encode record: {e}")))?;
        document.insert(
            "timestamp",
            bson::DateTime::from_millis(record.timestamp.timestamp_millis()),
        );
        Ok(document)
    }
}

#[async_trait]
impl InteractionStore for MongoStore {
    async fn insert(&self, record: &InteractionRecord) -> Result<()> {
        let document = Self::to_document(record)?;
        self.collection
            .insert_one(document)
            .await
            .map_err(|e| GatewayError::Storage(format!("Failed to insert interaction: {e}")))?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "mongodb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::{
        HeaderSnapshot, InteractionError, InteractionStart, LoggedBody, RequestSnapshot,
    };
    use mongodb::bson::Bson;
    use serde_json::json;

    #[test]
    fn test_to_document_uses_bson_datetime() {
        let start = InteractionStart::now();
        let record = InteractionRecord::failed(
            &start,
            RequestSnapshot {
                method: "POST".to_string(),
                path: "/v1beta/models/gemini-pro:generateContent".to_string(),
                headers: HeaderSnapshot::new(),
                body: LoggedBody::Json(json!({"generationConfig": {"temperature": 0.5}})),
            },
            InteractionError {
                message: "HTTP request failed".to_string(),
                details: "connection refused".to_string(),
            },
        );

        let document = MongoStore::to_document(&record).unwrap();

        let stored = document.get_datetime("timestamp").unwrap();
        assert_eq!(stored.timestamp_millis(), start.timestamp.timestamp_millis());
        assert_eq!(document.get("response"), Some(&Bson::Null));
        assert_eq!(
            document
                .get_document("error")
                .unwrap()
                .get_str("details")
                .unwrap(),
            "connection refused"
        );
        assert_eq!(
            document
                .get_document("generation_settings")
                .unwrap()
                .get_f64("temperature")
                .unwrap(),
            0.5
        );
    }
}
