//! Storage module for persisting processed records
//!
//! The crawler forwards every record produced by the processor to a sink
//! implementing [`Storage`]. Two sinks ship with the crate:
//! - [`InMemoryStorage`] keeps records in memory
//! - [`SqliteStorage`] writes records to a SQLite database as JSON

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::InMemoryStorage;
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use std::path::Path;
use std::sync::{Arc, Mutex};

/// Storage handle shared between the crawler's workers
pub type SharedStorage<K, R> = Arc<Mutex<dyn Storage<K, R> + Send>>;

/// Opens a SQLite record database, creating it if necessary
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_storage<K, R>(path: &Path) -> StorageResult<SqliteStorage<K, R>> {
    SqliteStorage::new(path)
}
