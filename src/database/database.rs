use tokio_rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::Path;
use log::info;
use thiserror::Error;
use std::sync::Arc;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("Database connection error: {0}")]
    Connection(String),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// SQLite-backed storage shared by the client key-value records and the
/// server's account tables.
#[derive(Clone)]
pub struct Database {
    pub(crate) conn: Arc<Connection>,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            }
        }

        let conn = Connection::open(path)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self {
            conn: Arc::new(conn),
        };
        db.initialize().await?;
        Ok(db)
    }

    pub async fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self {
            conn: Arc::new(conn),
        };
        db.initialize().await?;
        Ok(db)
    }

    async fn initialize(&self) -> Result<(), DatabaseError> {
        self.conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS kv_store (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
                );
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    password_hash TEXT NOT NULL,
                    subscription TEXT NOT NULL DEFAULT 'free',
                    subscription_end_date TEXT,
                    analysis_count INTEGER NOT NULL DEFAULT 0,
                    last_reset TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL
                );"
            )?;
            Ok(())
        })
        .await?;

        info!("Database initialized successfully");
        Ok(())
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let key = key.to_string();
        let result = self.conn
            .call(move |conn| {
                let value = conn
                    .query_row("SELECT value FROM kv_store WHERE key = ?1", [&key], |row| {
                        row.get::<_, String>(0)
                    })
                    .optional()?;
                Ok(value)
            })
            .await?;

        Ok(result)
    }

    /// Replaces the whole value under `key` in a single statement, so readers
    /// see either the old value or the new one.
    pub async fn set_value(&self, key: &str, value: String) -> Result<(), DatabaseError> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
                    [&key, &value],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_reads_none() {
        let db = Database::in_memory().await.unwrap();
        assert_eq!(db.get_value("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_value_overwrites() {
        let db = Database::in_memory().await.unwrap();
        db.set_value("k", "one".to_string()).await.unwrap();
        db.set_value("k", "two".to_string()).await.unwrap();
        assert_eq!(db.get_value("k").await.unwrap(), Some("two".to_string()));
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("nutribox.db");

        {
            let db = Database::new(&path).await.unwrap();
            db.set_value("k", "persisted".to_string()).await.unwrap();
        }

        let db = Database::new(&path).await.unwrap();
        assert_eq!(db.get_value("k").await.unwrap(), Some("persisted".to_string()));
    }
}
