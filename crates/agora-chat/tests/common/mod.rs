#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use uuid::Uuid;

use agora_chat::{Backend, ChatConfig, Session};
use agora_db::Database;
use agora_realtime::Hub;
use agora_storage::ObjectStore;
use agora_types::models::Profile;

pub const PUBLIC_BASE: &str = "http://localhost:3000/storage";

/// A database, object store and hub in a fresh temp directory.
pub struct Harness {
    pub backend: Backend,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("agora.db"), Hub::new()).unwrap();
        let objects = ObjectStore::new(dir.path().join("objects"), PUBLIC_BASE)
            .await
            .unwrap();
        let backend = Backend::new(Arc::new(db), Arc::new(objects), ChatConfig::default());
        Self { backend, dir }
    }

    pub fn db(&self) -> &Database {
        self.backend.db()
    }

    /// Register a profile and return a session acting as that user.
    pub fn user(&self, username: &str) -> Session {
        let id = Uuid::new_v4();
        self.db()
            .upsert_profile(&Profile {
                id,
                username: username.to_string(),
                full_name: None,
                avatar_url: None,
            })
            .unwrap();
        Session::new(id)
    }

    pub fn exec(&self, sql: &str) {
        self.db()
            .with_conn(|conn| {
                conn.execute_batch(sql)?;
                Ok(())
            })
            .unwrap();
    }

    pub fn object_exists(&self, url: &str) -> bool {
        let key = self.backend.objects().key_from_public_url(url).unwrap();
        self.backend.objects().object_path(&key).unwrap().exists()
    }

    /// Make every subsequent upload fail by putting a file where the
    /// storage root directory should be.
    pub fn break_object_store(&self) {
        let root = self.backend.objects().root().to_path_buf();
        std::fs::remove_dir_all(&root).unwrap();
        std::fs::write(&root, b"not a directory").unwrap();
    }
}
