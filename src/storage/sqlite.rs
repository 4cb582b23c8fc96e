//! SQLite storage implementation
//!
//! This module provides a SQLite-backed implementation of the Storage trait.
//! Keys and records are stored as JSON text. Saves are buffered and written
//! in a single transaction on `commit`; dropping the storage commits whatever
//! is still buffered.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage<K, R> {
    conn: Connection,
    buffer: Vec<(String, String)>,
    _types: PhantomData<fn() -> (K, R)>,
}

impl<K, R> SqliteStorage<K, R> {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            buffer: Vec::new(),
            _types: PhantomData,
        }
    }

    /// Number of records waiting for the next commit
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO records (record_key, payload, saved_at) VALUES (?1, ?2, ?3)",
            )?;
            for (key, payload) in &self.buffer {
                stmt.execute(params![key, payload, now])?;
            }
        }
        tx.commit()?;

        tracing::debug!("Committed {} records", self.buffer.len());
        self.buffer.clear();
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(raw: &str) -> StorageResult<T> {
    serde_json::from_str(raw).map_err(StorageError::from)
}

impl<K, R> Storage<K, R> for SqliteStorage<K, R>
where
    K: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
{
    fn save(&mut self, key: K, record: R) -> StorageResult<()> {
        let key = serde_json::to_string(&key)?;
        let payload = serde_json::to_string(&record)?;
        self.buffer.push((key, payload));
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        self.flush()
    }

    fn keys(&self) -> StorageResult<Vec<K>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_key FROM records GROUP BY record_key ORDER BY MIN(id)",
        )?;

        let raw = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        raw.iter().map(|key| decode(key)).collect()
    }

    fn values(&self, key: Option<&K>) -> StorageResult<Vec<R>> {
        let raw = match key {
            Some(key) => {
                let key = serde_json::to_string(key)?;
                let mut stmt = self
                    .conn
                    .prepare("SELECT payload FROM records WHERE record_key = ?1 ORDER BY id")?;
                let rows = stmt
                    .query_map(params![key], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare("SELECT payload FROM records ORDER BY id")?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        raw.iter().map(|payload| decode(payload)).collect()
    }

    fn items(&self) -> StorageResult<Vec<(K, R)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT record_key, payload FROM records ORDER BY id")?;

        let raw = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.iter()
            .map(|(key, payload)| -> StorageResult<(K, R)> { Ok((decode(key)?, decode(payload)?)) })
            .collect()
    }

    fn count(&self, key: &K) -> StorageResult<usize> {
        let key = serde_json::to_string(key)?;
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE record_key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl<K, R> Drop for SqliteStorage<K, R> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!("Failed to commit {} buffered records: {}", self.buffer.len(), e);
        }
    }
}
