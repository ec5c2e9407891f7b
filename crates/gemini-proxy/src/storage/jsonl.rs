//! JSON-lines interaction store
//!
//! Appends one serialized record per line to a local file. Useful when no
//! MongoDB deployment is available.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{GatewayError, Result};
use crate::interaction::InteractionRecord;
use crate::storage::InteractionStore;

pub struct JsonlStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlStore {
    /// Open (or create) the log file in append mode
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GatewayError::Storage(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| {
                GatewayError::Storage(format!("Failed to open {}: {}", path.display(), e))
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl InteractionStore for JsonlStore {
    async fn insert(&self, record: &InteractionRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        // One write per record under the lock keeps lines from interleaving.
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "jsonl"
    }
}
