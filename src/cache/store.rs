use crate::cache::{CacheStore, CachedValue};
use crate::error::{AppError, Result};
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// In-process cache store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CachedValue>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: CachedValue) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

/// SQLite-backed cache store, shared across restarts and processes.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a cache database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open cache database: {}", e)))?;

        Self::with_connection(conn)
    }

    /// Open an in-memory cache database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open cache database: {}", e)))?;

        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS feed_cache (
                key TEXT PRIMARY KEY,
                body BLOB NOT NULL,
                token TEXT NOT NULL,
                written_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl CacheStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT body, token, written_at FROM feed_cache WHERE key = ?1",
                params![key],
                |row| {
                    Ok(CachedValue {
                        body: row.get(0)?,
                        token: row.get(1)?,
                        written_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: CachedValue) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO feed_cache (key, body, token, written_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (key) DO UPDATE SET
                body = excluded.body,
                token = excluded.token,
                written_at = excluded.written_at",
            params![key, value.body, value.token, value.written_at],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM feed_cache WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM feed_cache", [])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM feed_cache ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}
