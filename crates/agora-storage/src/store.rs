use anyhow::{Result, bail};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// 50 MB upload limit for attachments and avatars
pub const MAX_OBJECT_SIZE: usize = 50 * 1024 * 1024;

/// Object storage for chat attachments and group avatars.
///
/// Objects live at `{root}/{key}` on disk and are published under
/// `{public_base}/{key}`, which is whatever serves `root` over HTTP.
pub struct ObjectStore {
    root: PathBuf,
    public_base: String,
}

impl ObjectStore {
    pub async fn new(root: PathBuf, public_base: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        info!("Object storage directory: {}", root.display());
        Ok(Self {
            root,
            public_base: public_base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to its on-disk path, refusing anything that could
    /// escape the storage root.
    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Invalid object key: {:?}", key);
        }
        Ok(self.root.join(relative))
    }

    /// Store a new object. Fails if `key` is already taken.
    pub async fn upload(&self, key: &str, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            bail!("Refusing to store empty object {}", key);
        }
        if bytes.len() > MAX_OBJECT_SIZE {
            bail!(
                "Object {} is {} bytes, limit is {}",
                key,
                bytes.len(),
                MAX_OBJECT_SIZE
            );
        }

        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                bail!("Object {} already exists", key)
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(bytes).await?;
        file.flush().await?;

        info!("Stored object {} ({} bytes)", key, bytes.len());
        Ok(())
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }

    /// Inverse of `public_url`. `None` for URLs this store did not issue.
    pub fn key_from_public_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.public_base)?
            .strip_prefix('/')
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;
        Ok(fs::read(&path).await?)
    }

    /// Delete one object. A missing object counts as deleted.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted object {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Object {} already gone", key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete several objects, continuing past individual failures.
    /// Returns one result per key, in input order.
    pub async fn remove(&self, keys: &[String]) -> Vec<(String, Result<()>)> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let result = self.delete(key).await;
            if let Err(e) = &result {
                warn!("Failed to delete object {}: {}", key, e);
            }
            results.push((key.clone(), result));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(dir: &tempfile::TempDir) -> ObjectStore {
        ObjectStore::new(dir.path().join("objects"), "http://localhost:3000/storage/")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upload_then_resolve_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        store.upload("messages/u1/1-a.txt", b"hello").await.unwrap();

        let url = store.public_url("messages/u1/1-a.txt");
        assert_eq!(url, "http://localhost:3000/storage/messages/u1/1-a.txt");
        assert_eq!(store.key_from_public_url(&url).as_deref(), Some("messages/u1/1-a.txt"));
        assert_eq!(store.read("messages/u1/1-a.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn upload_never_overwrites_an_existing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        store.upload("group-avatars/1-a.png", b"first").await.unwrap();
        assert!(store.upload("group-avatars/1-a.png", b"second").await.is_err());
        assert_eq!(store.read("group-avatars/1-a.png").await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn rejects_empty_objects_and_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        assert!(store.upload("a.txt", b"").await.is_err());
        assert!(store.upload("../outside.txt", b"x").await.is_err());
        assert!(store.upload("/etc/passwd", b"x").await.is_err());
        assert!(store.key_from_public_url("https://elsewhere.example/a.txt").is_none());
    }

    #[tokio::test]
    async fn remove_reports_each_key_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.upload("group-avatars/1-a.png", b"png").await.unwrap();

        let results = store
            .remove(&[
                "group-avatars/1-a.png".to_string(),
                "group-avatars/missing.png".to_string(),
                "../bad".to_string(),
            ])
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_ok());
        assert!(results[2].1.is_err());
        assert!(store.read("group-avatars/1-a.png").await.is_err());
    }
}
