//! In-memory storage implementation
//!
//! Keeps every record in memory. Nothing survives the process, which makes
//! it the sink of choice for tests and short interactive sessions.

use crate::storage::traits::{Storage, StorageResult};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// In-memory record sink
#[derive(Debug, Clone)]
pub struct InMemoryStorage<K, R> {
    order: Vec<K>,
    records: HashMap<K, VecDeque<R>>,
}

impl<K, R> Default for InMemoryStorage<K, R> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            records: HashMap::new(),
        }
    }
}

impl<K, R> InMemoryStorage<K, R>
where
    K: Eq + Hash + Clone,
    R: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if at least one record exists for the key
    pub fn contains_key(&self, key: &K) -> bool {
        self.records.contains_key(key)
    }

    /// Total number of records across all keys
    pub fn len(&self) -> usize {
        self.records.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<K, R> Storage<K, R> for InMemoryStorage<K, R>
where
    K: Eq + Hash + Clone,
    R: Clone,
{
    fn save(&mut self, key: K, record: R) -> StorageResult<()> {
        if !self.records.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.records.entry(key).or_default().push_back(record);
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<K>> {
        Ok(self.order.clone())
    }

    fn values(&self, key: Option<&K>) -> StorageResult<Vec<R>> {
        let values = match key {
            Some(key) => self
                .records
                .get(key)
                .map(|records| records.iter().cloned().collect())
                .unwrap_or_default(),
            None => self
                .order
                .iter()
                .filter_map(|key| self.records.get(key))
                .flat_map(|records| records.iter().cloned())
                .collect(),
        };
        Ok(values)
    }

    fn items(&self) -> StorageResult<Vec<(K, R)>> {
        Ok(self
            .order
            .iter()
            .filter_map(|key| self.records.get(key).map(|records| (key, records)))
            .flat_map(|(key, records)| records.iter().map(move |r| (key.clone(), r.clone())))
            .collect())
    }
}
