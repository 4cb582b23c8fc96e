//! Storage traits and error types
//!
//! This module defines the trait interface for record sinks and the
//! associated error types.

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for record sinks
///
/// A sink stores records under the key that produced them. Keys are not
/// unique: every record the crawler emits for a key is kept, in save order.
///
/// Implementations may buffer writes until `commit`; reads only have to
/// reflect committed records.
pub trait Storage<K, R> {
    /// Saves one record for a key
    fn save(&mut self, key: K, record: R) -> StorageResult<()>;

    /// Saves keys and records pairwise, stopping at the shorter sequence
    fn save_multiple<KI, RI>(&mut self, keys: KI, records: RI) -> StorageResult<()>
    where
        KI: IntoIterator<Item = K>,
        RI: IntoIterator<Item = R>,
        Self: Sized,
    {
        self.save_from_iter(keys.into_iter().zip(records))
    }

    /// Saves pairs of keys and records in order
    fn save_from_iter<I>(&mut self, items: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = (K, R)>,
        Self: Sized,
    {
        for (key, record) in items {
            self.save(key, record)?;
        }
        Ok(())
    }

    /// Flushes buffered records
    fn commit(&mut self) -> StorageResult<()>;

    /// Returns every distinct key in first-save order
    fn keys(&self) -> StorageResult<Vec<K>>;

    /// Returns records for one key, or all records if `key` is `None`
    fn values(&self, key: Option<&K>) -> StorageResult<Vec<R>>;

    /// Returns all records paired with their keys
    fn items(&self) -> StorageResult<Vec<(K, R)>>;

    /// Number of records stored for a key
    fn count(&self, key: &K) -> StorageResult<usize> {
        Ok(self.values(Some(key))?.len())
    }
}
