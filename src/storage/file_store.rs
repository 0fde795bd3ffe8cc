//! Filesystem artifact store

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::{AppError, Result};
use crate::storage::{ArtifactStore, StoredObject};

/// Stores artifact bytes under a base directory and serves them through a
/// configured public URL prefix
pub struct FileStore {
    base_path: PathBuf,
    url_prefix: String,
}

impl FileStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            base_path: PathBuf::from(&config.base_path),
            url_prefix: config.url_prefix.trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.url_prefix, key)
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>> {
        fs::read(self.path_for(key)).await.map_err(AppError::Io)
    }
}

#[async_trait]
impl ArtifactStore for FileStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<StoredObject> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(AppError::Io)?;
        }

        fs::write(&path, bytes).await.map_err(AppError::Io)?;
        debug!(path = ?path, size = bytes.len(), content_type, "Stored artifact");

        Ok(StoredObject {
            key: key.to_string(),
            public_url: self.public_url(key),
            size_bytes: bytes.len() as u64,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        fs::remove_file(self.path_for(key))
            .await
            .map_err(AppError::Io)
    }
}
