//! Key to record mapping backing every index.
//!
//! The store has no locking of its own; it lives inside the owning index's
//! lock.

use std::collections::HashMap;

use crate::types::IndexRecord;

/// In-memory map from index key to the full payload record.
#[derive(Debug, Clone)]
pub struct PayloadStore<R: IndexRecord> {
    records: HashMap<R::Key, R>,
}

impl<R: IndexRecord> Default for PayloadStore<R> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl<R: IndexRecord> PayloadStore<R> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from records, keyed by each record's own key.
    ///
    /// Later records win on duplicate keys.
    pub fn from_records(records: impl IntoIterator<Item = R>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.key().clone(), record))
            .collect();
        Self { records }
    }

    /// Inserts or replaces a record, returning the previous one.
    pub fn insert(&mut self, record: R) -> Option<R> {
        self.records.insert(record.key().clone(), record)
    }

    /// Removes a record.
    pub fn remove(&mut self, key: &R::Key) -> Option<R> {
        self.records.remove(key)
    }

    /// Looks up a record.
    #[must_use]
    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.records.get(key)
    }

    /// Looks up a record for in-place mutation.
    pub fn get_mut(&mut self, key: &R::Key) -> Option<&mut R> {
        self.records.get_mut(key)
    }

    /// Returns `true` if the key has a payload.
    #[must_use]
    pub fn contains(&self, key: &R::Key) -> bool {
        self.records.contains_key(key)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over all records in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.records.values()
    }

    /// Highest row id among the records, used as the high-water mark.
    #[must_use]
    pub fn max_row_id(&self) -> Option<i64> {
        self.records.values().filter_map(IndexRecord::row_id).max()
    }

    /// Records sorted by key, for deterministic snapshots.
    #[must_use]
    pub fn sorted_records(&self) -> Vec<R> {
        let mut records: Vec<R> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.key().cmp(b.key()));
        records
    }
}
