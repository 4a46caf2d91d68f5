//! The authoritative store the indexes mirror.
//!
//! The relational database owning face and embedding rows lives outside this
//! crate. Indexes reach it only through these traits, passed in at
//! construction.

use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::records::{FaceRecord, IdentityLink};
use crate::types::IndexRecord;

/// Cheap aggregates used by the staleness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceStats {
    /// Number of rows that carry an embedding.
    pub count: usize,
    /// Highest row id, for stores with integer keys.
    pub max_id: Option<i64>,
}

impl SourceStats {
    /// Creates stats from a count and high-water mark.
    #[must_use]
    pub const fn new(count: usize, max_id: Option<i64>) -> Self {
        Self { count, max_id }
    }
}

/// Read access to the rows backing an index.
pub trait RecordSource<R: IndexRecord>: Send + Sync {
    /// All rows with embeddings, for a full build.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    fn snapshot(&self) -> anyhow::Result<Vec<R>>;

    /// One row, for incremental inserts.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    fn fetch(&self, key: &R::Key) -> anyhow::Result<Option<R>>;

    /// Count and high-water mark of rows with embeddings.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    fn stats(&self) -> anyhow::Result<SourceStats>;
}

/// Write access to face identity linkage.
pub trait IdentityWriter: Send + Sync {
    /// Persists new marker/subject linkage for a face row.
    ///
    /// Returns `false` if the row does not exist.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    fn update_identity(&self, face_id: i64, link: &IdentityLink) -> anyhow::Result<bool>;
}

/// A simple in-memory store for testing and prototyping.
#[derive(Debug)]
pub struct MemorySource<R: IndexRecord> {
    rows: RwLock<BTreeMap<R::Key, R>>,
}

impl<R: IndexRecord> Default for MemorySource<R> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<R: IndexRecord> MemorySource<R> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `rows`.
    pub fn with_rows(rows: impl IntoIterator<Item = R>) -> Self {
        let source = Self::new();
        for row in rows {
            source.upsert(row);
        }
        source
    }

    /// Inserts or replaces a row.
    pub fn upsert(&self, row: R) {
        self.rows.write().insert(row.key().clone(), row);
    }

    /// Deletes a row, returning it.
    pub fn delete(&self, key: &R::Key) -> Option<R> {
        self.rows.write().remove(key)
    }
}

impl<R: IndexRecord> RecordSource<R> for MemorySource<R> {
    fn snapshot(&self) -> anyhow::Result<Vec<R>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|row| !row.embedding().is_empty())
            .cloned()
            .collect())
    }

    fn fetch(&self, key: &R::Key) -> anyhow::Result<Option<R>> {
        Ok(self.rows.read().get(key).cloned())
    }

    fn stats(&self) -> anyhow::Result<SourceStats> {
        let rows = self.rows.read();
        let with_embedding = rows.values().filter(|row| !row.embedding().is_empty());
        let (count, max_id) = with_embedding.fold((0, None), |(count, max), row| {
            (count + 1, max.max(row.row_id()))
        });
        Ok(SourceStats::new(count, max_id))
    }
}

impl IdentityWriter for MemorySource<FaceRecord> {
    fn update_identity(&self, face_id: i64, link: &IdentityLink) -> anyhow::Result<bool> {
        let mut rows = self.rows.write();
        let Some(row) = rows.get_mut(&face_id) else {
            return Ok(false);
        };
        row.identity = link.clone();
        Ok(true)
    }
}
