pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use agora_realtime::Hub;

pub use models::{ChatRowCounts, now};

/// SQLite-backed persistence for the chat tables.
///
/// Every successful write is pushed to the realtime [`Hub`] after it is
/// committed, so subscribers only ever see durable rows.
pub struct Database {
    conn: Mutex<Connection>,
    hub: Hub,
}

impl Database {
    pub fn open(path: &Path, hub: Hub) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::init(conn, hub)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory(hub: Hub) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, hub)
    }

    fn init(conn: Connection, hub: Hub) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            hub,
        })
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Like `with_conn`, but hands out `&mut` so callers can open a transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }
}
