//! Core types shared by the face and image indexes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;

use crate::error::Result;

/// Identifier of an indexed item.
///
/// Implemented for `i64` (face row ids) and `String` (photo uids).
pub trait IndexKey:
    Clone + Eq + Ord + Hash + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl IndexKey for i64 {}

impl IndexKey for String {}

/// A record that can be stored in a [`SimilarityIndex`](crate::SimilarityIndex).
///
/// The record is the payload handed back to callers after a search. It carries
/// its own copy of the embedding so distances can be recomputed without
/// consulting the graph.
pub trait IndexRecord: Clone + Debug + Send + Sync + 'static {
    /// Key type used by the index.
    type Key: IndexKey;

    /// Short name used in logs, e.g. `"face"`.
    const KIND: &'static str;

    /// Returns the record's key.
    fn key(&self) -> &Self::Key;

    /// Returns the embedding vector. May be empty.
    fn embedding(&self) -> &[f32];

    /// Returns the database row id used as the high-water mark, if any.
    fn row_id(&self) -> Option<i64> {
        None
    }

    /// Encodes a payload snapshot for persistence.
    ///
    /// # Errors
    /// Returns an error if the records cannot be archived.
    fn encode_snapshot(records: &[Self]) -> Result<Vec<u8>>;

    /// Decodes a payload snapshot written by [`IndexRecord::encode_snapshot`].
    ///
    /// # Errors
    /// Returns an error if the bytes are not a valid archive.
    fn decode_snapshot(bytes: &[u8]) -> Result<Vec<Self>>;
}

/// A search hit: a key and its cosine distance to the query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neighbor<K> {
    /// Key of the matching item.
    pub key: K,
    /// Cosine distance to the query (lower is closer).
    pub distance: f32,
}

impl<K> Neighbor<K> {
    /// Creates a new search hit.
    #[must_use]
    pub const fn new(key: K, distance: f32) -> Self {
        Self { key, distance }
    }

    /// Cosine similarity corresponding to [`Neighbor::distance`].
    #[must_use]
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}
