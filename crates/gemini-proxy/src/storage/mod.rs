//! Interaction store backends
//!
//! The gateway only ever needs `insert(record)`; everything else about the
//! store (connection pooling, reconnection, indexing) belongs to the backend.

pub mod jsonl;
pub mod mongo;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StorageConfig;
use crate::error::{GatewayError, Result};
use crate::interaction::InteractionRecord;

pub use jsonl::JsonlStore;
pub use mongo::MongoStore;

/// A sink for interaction records, shared by every in-flight request
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Persist one record
    async fn insert(&self, record: &InteractionRecord) -> Result<()>;

    /// Backend name for logging
    fn backend(&self) -> &'static str;
}

/// Where the configured store URI points
#[derive(Debug, Clone, PartialEq)]
pub enum StoreLocation {
    /// A MongoDB deployment (`mongodb://` or `mongodb+srv://`)
    Mongo(String),
    /// A local JSON-lines file (`file://<path>` or a bare path)
    File(PathBuf),
}

impl StoreLocation {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();

        if uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://") {
            return Ok(StoreLocation::Mongo(uri.to_string()));
        }

        let path = match uri.strip_prefix("file://") {
            Some(path) => path,
            None if uri.contains("://") => {
                return Err(GatewayError::Config(format!(
                    "Unsupported store URI '{uri}': expected mongodb://, mongodb+srv:// or file://"
                )));
            }
            None => uri,
        };

        if path.is_empty() {
            return Err(GatewayError::Config("Store URI has an empty path".to_string()));
        }

        Ok(StoreLocation::File(PathBuf::from(path)))
    }
}

/// Open the configured store once at startup
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn InteractionStore>> {
    match StoreLocation::parse(&config.uri)? {
        StoreLocation::Mongo(uri) => {
            let store = MongoStore::connect(&uri, &config.database, &config.collection).await?;
            Ok(Arc::new(store))
        }
        StoreLocation::File(path) => {
            tracing::info!("Logging interactions to {}", path.display());
            let store = JsonlStore::open(&path).await?;
            Ok(Arc::new(store))
        }
    }
}
