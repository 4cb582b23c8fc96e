//! Backlog module: the deduplicating work queue
//!
//! The backlog tracks three pieces of state behind a single lock:
//! - `pending`: keys waiting to be processed
//! - `seen`: every key ever accepted by `add` (never shrinks)
//! - `re_adds`: how often each key was pushed back after processing
//!
//! `add` is idempotent per key. `re_add` bypasses the dedup ledger and is
//! the only way to process a key a second time, bounded by `re_add_limit`.

mod snapshot;
mod strategy;

pub use snapshot::{inspect_snapshot, SnapshotSummary, SNAPSHOT_VERSION};
pub use strategy::SelectionStrategy;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Default number of times a single key may be re-added
pub const DEFAULT_RE_ADD_LIMIT: u32 = 2;

/// Anything usable as a backlog key
///
/// Keys need equality and hashing for deduplication and serde support so the
/// backlog can be snapshotted and restored.
pub trait Key:
    Eq + Hash + Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> Key for T where
    T: Eq + Hash + Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// Errors raised by backlog operations
#[derive(Debug, Error)]
pub enum BacklogError {
    #[error("backlog is empty")]
    Empty,

    #[error("re-add limit of {limit} reached for key `{key}`")]
    ReAddLimitReached { key: String, limit: u32 },

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("snapshot IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for backlog operations
pub type BacklogResult<T> = Result<T, BacklogError>;

#[derive(Debug)]
struct BacklogState<K> {
    pending: VecDeque<K>,
    seen: HashSet<K>,
    re_adds: HashMap<K, u32>,
}

impl<K> Default for BacklogState<K> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            seen: HashSet::new(),
            re_adds: HashMap::new(),
        }
    }
}

/// Ownership-tracked, deduplicating queue of keys
///
/// All operations take `&self`; the backlog is meant to be shared as
/// `Arc<Backlog<K>>` between the crawler and the processor so that keys can
/// be enqueued while other keys are being processed.
#[derive(Debug)]
pub struct Backlog<K> {
    strategy: SelectionStrategy,
    re_add_limit: u32,
    state: Mutex<BacklogState<K>>,
}

impl<K: Key> Default for Backlog<K> {
    fn default() -> Self {
        Self::new(SelectionStrategy::Fifo, DEFAULT_RE_ADD_LIMIT)
    }
}

impl<K: Key> Backlog<K> {
    /// Creates an empty backlog
    ///
    /// # Arguments
    ///
    /// * `strategy` - How `next` chooses among pending keys
    /// * `re_add_limit` - Maximum number of re-adds allowed per key
    pub fn new(strategy: SelectionStrategy, re_add_limit: u32) -> Self {
        Self {
            strategy,
            re_add_limit,
            state: Mutex::new(BacklogState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, BacklogState<K>> {
        // No operation can leave the state half-updated, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a key unless it has been seen before
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.seen.insert(key.clone()) {
            tracing::trace!("Backlog accepted key {:?}", key);
            state.pending.push_back(key);
        }
    }

    /// Adds every key in order, skipping keys already seen
    pub fn add_multiple<I>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
    {
        for key in keys {
            self.add(key);
        }
    }

    /// Removes and returns the next key according to the selection strategy
    ///
    /// # Returns
    ///
    /// * `Ok(K)` - The selected key
    /// * `Err(BacklogError::Empty)` - Nothing is pending
    pub fn next(&self) -> BacklogResult<K> {
        let mut state = self.state();
        let key = match self.strategy {
            SelectionStrategy::Fifo => state.pending.pop_front(),
            SelectionStrategy::Random => {
                if state.pending.is_empty() {
                    None
                } else {
                    let index = rand::rng().random_range(0..state.pending.len());
                    state.pending.swap_remove_back(index)
                }
            }
        };
        key.ok_or(BacklogError::Empty)
    }

    /// Returns true if there are no pending keys
    pub fn is_empty(&self) -> bool {
        self.state().pending.is_empty()
    }

    /// Pushes a key back onto the pending queue, even if it was already processed
    ///
    /// The attempt is counted before the limit is checked, so a refused
    /// re-add still shows up in `re_add_count`.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The key is pending again
    /// * `Err(BacklogError::ReAddLimitReached)` - The key exhausted its budget
    pub fn re_add(&self, key: K) -> BacklogResult<()> {
        let mut state = self.state();
        let count = state.re_adds.entry(key.clone()).or_insert(0);
        *count += 1;

        if *count > self.re_add_limit {
            return Err(BacklogError::ReAddLimitReached {
                key: format!("{:?}", key),
                limit: self.re_add_limit,
            });
        }

        tracing::debug!("Re-added key {:?} ({}/{})", key, count, self.re_add_limit);
        state.pending.push_back(key);
        Ok(())
    }

    /// Number of pending keys
    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    /// Number of distinct keys ever added, processed or still pending
    pub fn total(&self) -> usize {
        self.state().seen.len()
    }

    /// Number of recorded re-add attempts for a key
    pub fn re_add_count(&self, key: &K) -> u32 {
        self.state().re_adds.get(key).copied().unwrap_or(0)
    }

    /// Returns true if the key was ever accepted by `add`
    pub fn contains(&self, key: &K) -> bool {
        self.state().seen.contains(key)
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    pub fn re_add_limit(&self) -> u32 {
        self.re_add_limit
    }
}
