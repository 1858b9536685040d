use std::sync::Arc;

use anyhow::anyhow;
use tracing::{error, warn};

use agora_db::Database;
use agora_realtime::Hub;
use agora_storage::ObjectStore;

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};

/// A file picked by the user, not yet uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Shared handles to the persistence/realtime service and object storage.
#[derive(Clone)]
pub struct Backend {
    db: Arc<Database>,
    objects: Arc<ObjectStore>,
    config: ChatConfig,
}

impl Backend {
    pub fn new(db: Arc<Database>, objects: Arc<ObjectStore>, config: ChatConfig) -> Self {
        Self {
            db,
            objects,
            config,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn hub(&self) -> &Hub {
        self.db.hub()
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Run a blocking database call off the async runtime.
    pub async fn db_call<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                anyhow!("database task failed: {}", e)
            })?
    }

    /// Upload under `key` and return the object's public URL.
    pub async fn upload(&self, key: &str, file: &FileUpload) -> Result<String> {
        self.objects
            .upload(key, &file.bytes)
            .await
            .map_err(ChatError::Upload)?;
        Ok(self.objects.public_url(key))
    }

    /// Best-effort removal of objects by public URL.
    /// Returns (removed, failed); URLs this store never issued count as failed.
    pub async fn remove_objects(&self, urls: &[String]) -> (usize, usize) {
        let mut keys = Vec::with_capacity(urls.len());
        let mut failed = 0;
        for url in urls {
            match self.objects.key_from_public_url(url) {
                Some(key) => keys.push(key),
                None => {
                    warn!("Not removing foreign object URL {}", url);
                    failed += 1;
                }
            }
        }

        for (_, result) in self.objects.remove(&keys).await {
            if result.is_err() {
                failed += 1;
            }
        }
        (urls.len() - failed, failed)
    }
}
