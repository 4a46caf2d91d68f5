//! Similarity indexes over face and image embeddings.
//!
//! Both indexes share [`SimilarityIndex`], generic over the payload record.
//! [`FaceIndex`] and [`ImageIndex`] add the few operations specific to their
//! record type.

mod face;
mod image;

pub use face::FaceIndex;
pub use image::ImageIndex;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{GraphParams, IndexConfig};
use crate::distance::{EmbeddingPoint, cosine_distance};
use crate::error::{Artifact, IndexError, Result};
use crate::graph::{FreshGraph, GraphState, build_graph};
use crate::payload::PayloadStore;
use crate::persistence::{
    ArtifactPaths, FORMAT_VERSION, IndexMetadata, StoredMetadata, checksum, decode_graph,
    encode_graph, read_artifact, remove_artifacts, write_artifact,
};
use crate::types::{IndexRecord, Neighbor};

/// Multiplier applied to `k` when over-fetching for [`SimilarityIndex::search_within`].
pub const OVERSAMPLE_FACTOR: usize = 4;

/// Lower bound on raw candidates requested by [`SimilarityIndex::search_within`].
pub const MIN_CANDIDATES: usize = 64;

/// Everything that is replaced together on a rebuild or load.
struct Generation<R: IndexRecord> {
    graph: GraphState<R::Key>,
    payloads: PayloadStore<R>,
    /// Keys whose payload was removed while their graph node remains.
    tombstones: HashSet<R::Key>,
    built_at: DateTime<Utc>,
}

impl<R: IndexRecord> Generation<R> {
    fn empty() -> Self {
        Self {
            graph: GraphState::Empty,
            payloads: PayloadStore::new(),
            tombstones: HashSet::new(),
            built_at: Utc::now(),
        }
    }
}

/// Result of [`SimilarityIndex::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// All three artifacts were written.
    Saved {
        /// Number of payload records written.
        count: usize,
    },
    /// The index was empty and any existing artifacts were deleted.
    Cleared,
}

/// Result of [`SimilarityIndex::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The snapshot was installed.
    Loaded {
        /// Number of payload records loaded.
        count: usize,
    },
    /// No graph artifact exists yet.
    Missing,
    /// A snapshot exists but cannot be used by this index. The caller should
    /// rebuild from the store.
    Incompatible(String),
}

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    /// Items with a payload.
    pub live: usize,
    /// Physical graph nodes, including soft-deleted ones.
    pub nodes: usize,
    /// Items inserted since the graph was last built.
    pub pending: usize,
    /// Soft-deleted items still present in the graph.
    pub tombstones: usize,
    /// Graph nodes whose key has since been re-added with a new vector.
    pub superseded: usize,
    /// Whether a graph exists.
    pub ready: bool,
}

/// Approximate nearest-neighbor index over one kind of record.
///
/// Reads (`search`, `search_within`, `get`, `len`, ...) share a read lock and
/// run concurrently. Mutations take the write lock. [`SimilarityIndex::build`]
/// and [`SimilarityIndex::load`] prepare the new generation before locking, so
/// readers are only blocked for the final swap. `save` and `load` are
/// serialized with each other so a load never sees a half-written snapshot.
///
/// A graph search sees at most `ef_search` candidates. Queries that need more
/// (large `k`, many soft-deleted or superseded nodes) scan the payloads
/// exhaustively instead.
pub struct SimilarityIndex<R: IndexRecord> {
    dimension: usize,
    params: GraphParams,
    compaction_threshold: usize,
    state: RwLock<Generation<R>>,
    persist: Mutex<()>,
}

impl<R: IndexRecord> std::fmt::Debug for SimilarityIndex<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("SimilarityIndex")
            .field("kind", &R::KIND)
            .field("dimension", &self.dimension)
            .field("len", &state.payloads.len())
            .field("graph", &state.graph)
            .finish_non_exhaustive()
    }
}

impl<R: IndexRecord> SimilarityIndex<R> {
    /// Creates an empty index with default graph parameters.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self::with_config(dimension, &IndexConfig::default())
    }

    /// Creates an empty index using the graph settings from `config`.
    #[must_use]
    pub fn with_config(dimension: usize, config: &IndexConfig) -> Self {
        Self {
            dimension,
            params: config.graph.clone(),
            compaction_threshold: config.compaction_threshold.max(1),
            state: RwLock::new(Generation::empty()),
            persist: Mutex::new(()),
        }
    }

    /// Embedding dimension accepted by this index.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }

    /// Replaces the entire index with `items`.
    ///
    /// Items with an empty embedding are skipped. With no usable items the
    /// index becomes empty and searches fail with [`IndexError::NotReady`].
    ///
    /// # Returns
    /// The number of indexed items.
    ///
    /// # Errors
    /// Returns [`IndexError::DimensionMismatch`] if any non-empty embedding has
    /// the wrong dimension. The current generation is left untouched.
    pub fn build(&self, items: impl IntoIterator<Item = R>) -> Result<usize> {
        let mut skipped = 0usize;
        let mut usable = Vec::new();
        for item in items {
            if item.embedding().is_empty() {
                skipped += 1;
                continue;
            }
            self.check_dimension(item.embedding())?;
            usable.push(item);
        }

        let payloads = PayloadStore::from_records(usable);
        let graph = GraphState::fresh(build_graph(&self.params, graph_nodes(&payloads)));
        let count = payloads.len();

        let generation = Generation {
            graph,
            payloads,
            tombstones: HashSet::new(),
            built_at: Utc::now(),
        };
        *self.state.write() = generation;

        info!(kind = R::KIND, count, skipped, "built similarity index");
        Ok(count)
    }

    /// Inserts or replaces a single item.
    ///
    /// The first insert into an empty index creates the graph. Inserting into
    /// a loaded snapshot keeps the loaded graph and makes it insert-capable.
    ///
    /// # Returns
    /// `false` if the item has an empty embedding and was skipped.
    ///
    /// # Errors
    /// Returns [`IndexError::DimensionMismatch`] for a wrongly sized embedding.
    pub fn add(&self, item: R) -> Result<bool> {
        if item.embedding().is_empty() {
            return Ok(false);
        }
        self.check_dimension(item.embedding())?;

        let key = item.key().clone();
        let point = EmbeddingPoint::new(item.embedding());
        let mut state = self.state.write();

        let reembedded = state
            .payloads
            .get(&key)
            .is_some_and(|existing| existing.embedding() != item.embedding());
        let replaced = state.payloads.insert(item).is_some();
        let revived = state.tombstones.remove(&key);

        if reembedded || revived {
            // The old node may still carry the previous vector.
            state.graph.supersede(key.clone(), point);
            debug!(kind = R::KIND, %key, "superseded graph node");
        } else if !replaced {
            state.graph.insert(key.clone(), point);
            debug!(kind = R::KIND, %key, pending = state.graph.pending_len(), "added item");
        }

        if state.graph.pending_len() >= self.compaction_threshold {
            self.compact_locked(&mut state);
        }
        Ok(true)
    }

    /// Rebuilds the graph from the live payloads, folding in pending inserts
    /// and dropping soft-deleted nodes.
    pub fn compact(&self) {
        let mut state = self.state.write();
        self.compact_locked(&mut state);
    }

    fn compact_locked(&self, state: &mut Generation<R>) {
        if !state.graph.is_ready() {
            return;
        }
        let nodes = graph_nodes(&state.payloads);
        let count = nodes.len();
        // Stays fresh even with no nodes left, so searches keep returning
        // empty results instead of `NotReady`.
        state.graph = GraphState::Fresh(FreshGraph::from_base(build_graph(&self.params, nodes)));
        state.tombstones.clear();
        debug!(kind = R::KIND, count, "compacted similarity graph");
    }

    /// Soft-deleted nodes tolerated before the graph is compacted. Kept well
    /// below `ef_search` so ordinary searches stay on the graph.
    fn tombstone_limit(&self) -> usize {
        (self.params.ef_search / 2).min(self.compaction_threshold).max(1)
    }

    /// Up to `wanted` live candidates nearest to `query`.
    ///
    /// Falls back to an exhaustive payload scan when the graph would have to
    /// return more than `ef_search` nodes to guarantee `wanted` live ones.
    fn candidates(
        &self,
        state: &Generation<R>,
        query: &[f32],
        wanted: usize,
    ) -> Result<Vec<Neighbor<R::Key>>> {
        if !state.graph.is_ready() {
            return Err(IndexError::NotReady);
        }

        let budget = wanted
            .saturating_add(state.tombstones.len())
            .saturating_add(state.graph.superseded_len());
        if budget > self.params.ef_search {
            return Ok(scan_payloads(&state.payloads, query, wanted));
        }

        Ok(state
            .graph
            .nearest(query, budget)?
            .into_iter()
            .filter(|hit| state.payloads.contains(&hit.key))
            .take(wanted)
            .collect())
    }

    /// Finds up to `k` items nearest to `query`, closest first.
    ///
    /// Soft-deleted items never appear.
    ///
    /// # Errors
    /// Returns [`IndexError::NotReady`] if no graph exists and
    /// [`IndexError::DimensionMismatch`] for a wrongly sized query.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor<R::Key>>> {
        self.check_dimension(query)?;
        let state = self.state.read();
        self.candidates(&state, query, k)
    }

    /// Finds up to `k` items whose cosine distance to `query` is strictly
    /// below `max_distance`, closest first.
    ///
    /// The graph is asked for `max(k * OVERSAMPLE_FACTOR, MIN_CANDIDATES)`
    /// candidates, since approximate search loses some true neighbors once a
    /// distance cut-off is applied. Distances are recomputed from each
    /// candidate's payload; candidates with no payload or an empty payload
    /// embedding are dropped.
    ///
    /// # Errors
    /// Returns [`IndexError::NotReady`] if no graph exists and
    /// [`IndexError::DimensionMismatch`] for a wrongly sized query.
    pub fn search_within(
        &self,
        query: &[f32],
        k: usize,
        max_distance: f32,
    ) -> Result<Vec<Neighbor<R::Key>>> {
        self.check_dimension(query)?;
        let state = self.state.read();

        let wanted = k.saturating_mul(OVERSAMPLE_FACTOR).max(MIN_CANDIDATES);
        let candidates = self.candidates(&state, query, wanted)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<_> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let payload = state.payloads.get(&candidate.key)?;
                if payload.embedding().is_empty() {
                    return None;
                }
                let distance = cosine_distance(query, payload.embedding());
                (distance < max_distance).then(|| Neighbor::new(candidate.key, distance))
            })
            .collect();

        hits.sort_by_key(|hit| OrderedFloat(hit.distance));
        hits.truncate(k);
        Ok(hits)
    }

    /// Finds items similar to an already indexed item, excluding the item
    /// itself.
    ///
    /// Returns an empty list if `key` has no payload.
    ///
    /// # Errors
    /// Returns [`IndexError::NotReady`] if no graph exists.
    pub fn neighbors_of(
        &self,
        key: &R::Key,
        k: usize,
        max_distance: f32,
    ) -> Result<Vec<Neighbor<R::Key>>> {
        let Some(embedding) = self.state.read().payloads.get(key).map(|p| p.embedding().to_vec())
        else {
            return Ok(Vec::new());
        };

        let mut hits = self.search_within(&embedding, k.saturating_add(1), max_distance)?;
        hits.retain(|hit| &hit.key != key);
        hits.truncate(k);
        Ok(hits)
    }

    /// Returns a copy of the payload for `key`.
    #[must_use]
    pub fn get(&self, key: &R::Key) -> Option<R> {
        self.state.read().payloads.get(key).cloned()
    }

    /// Returns `true` if `key` has a payload.
    #[must_use]
    pub fn contains(&self, key: &R::Key) -> bool {
        self.state.read().payloads.contains(key)
    }

    /// Number of items with a payload. Soft-deleted items are not counted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().payloads.len()
    }

    /// Returns `true` if no item has a payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().payloads.is_empty()
    }

    /// Returns `true` if a graph exists and searches can run.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.read().graph.is_ready()
    }

    /// When the current generation was built or, if loaded, originally built.
    #[must_use]
    pub fn built_at(&self) -> DateTime<Utc> {
        self.state.read().built_at
    }

    /// Diagnostic counters.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        IndexStats {
            live: state.payloads.len(),
            nodes: state.graph.node_count(),
            pending: state.graph.pending_len(),
            tombstones: state.tombstones.len(),
            superseded: state.graph.superseded_len(),
            ready: state.graph.is_ready(),
        }
    }

    /// Removes the payload for `key`. The graph node stays until the next
    /// rebuild or compaction and is filtered out of results.
    ///
    /// # Returns
    /// `true` if a payload was removed.
    pub fn soft_delete(&self, key: &R::Key) -> bool {
        let mut state = self.state.write();
        if state.payloads.remove(key).is_none() {
            return false;
        }
        state.tombstones.insert(key.clone());
        debug!(kind = R::KIND, %key, "soft-deleted item");

        if state.tombstones.len() >= self.tombstone_limit() {
            self.compact_locked(&mut state);
        }
        true
    }

    /// Applies `patch` to the payload for `key` without touching the graph.
    ///
    /// The patch must not change the embedding. Returns `false` if the key
    /// has no payload.
    pub(crate) fn patch_payload(&self, key: &R::Key, patch: impl FnOnce(&mut R)) -> bool {
        let mut state = self.state.write();
        let Some(record) = state.payloads.get_mut(key) else {
            return false;
        };
        patch(record);
        true
    }

    /// Writes the index to the three artifacts derived from `base`.
    ///
    /// An empty index deletes any existing artifacts instead. Pending inserts
    /// are compacted into the graph first. The graph is written before the
    /// metadata, and the metadata before the payloads.
    ///
    /// # Errors
    /// Returns an error naming the artifact that failed to encode or write.
    /// The in-memory index is unaffected.
    pub fn save(&self, base: impl AsRef<Path>) -> Result<SaveOutcome> {
        let paths = ArtifactPaths::new(base);
        let _persist = self.persist.lock();
        let mut state = self.state.write();

        if state.payloads.is_empty() {
            remove_artifacts(&paths)?;
            info!(
                kind = R::KIND,
                path = %paths.path(Artifact::Graph).display(),
                "cleared persisted index"
            );
            return Ok(SaveOutcome::Cleared);
        }

        if state.graph.exportable().is_none() {
            self.compact_locked(&mut state);
        }
        let graph = state.graph.exportable().ok_or(IndexError::NotReady)?;

        let graph_bytes = encode_graph(graph)?;
        let payload_bytes = R::encode_snapshot(&state.payloads.sorted_records())?;
        let metadata = IndexMetadata {
            version: FORMAT_VERSION,
            kind: R::KIND.to_string(),
            count: state.payloads.len(),
            max_id: state.payloads.max_row_id(),
            dimension: self.dimension,
            built_at: state.built_at,
            graph_checksum: checksum(&graph_bytes),
            payload_checksum: checksum(&payload_bytes),
        };

        write_artifact(&paths, Artifact::Graph, &graph_bytes)?;
        write_artifact(&paths, Artifact::Metadata, &metadata.to_json()?)?;
        write_artifact(&paths, Artifact::Payloads, &payload_bytes)?;

        info!(
            kind = R::KIND,
            count = metadata.count,
            path = %paths.path(Artifact::Graph).display(),
            "saved similarity index"
        );
        Ok(SaveOutcome::Saved {
            count: metadata.count,
        })
    }

    /// Replaces the index with the snapshot at `base`.
    ///
    /// The loaded graph is read-only until the next insert. Nothing is
    /// installed unless every artifact decodes and verifies.
    ///
    /// # Errors
    /// Returns an error naming the artifact that could not be read, decoded
    /// or verified. A missing graph is [`LoadOutcome::Missing`], not an error.
    pub fn load(&self, base: impl AsRef<Path>) -> Result<LoadOutcome> {
        let paths = ArtifactPaths::new(base);
        let _persist = self.persist.lock();

        let Some(graph_bytes) = read_artifact(&paths, Artifact::Graph)? else {
            return Ok(LoadOutcome::Missing);
        };
        let Some(metadata_bytes) = read_artifact(&paths, Artifact::Metadata)? else {
            warn!(kind = R::KIND, "graph artifact has no metadata, ignoring snapshot");
            return Ok(LoadOutcome::Incompatible("metadata artifact missing".into()));
        };
        let metadata = match StoredMetadata::from_json(&metadata_bytes)? {
            StoredMetadata::Current(metadata) => metadata,
            StoredMetadata::OtherVersion(found) => {
                let reason = format!("format version {found} (expected {FORMAT_VERSION})");
                warn!(kind = R::KIND, %reason, "ignoring incompatible snapshot");
                return Ok(LoadOutcome::Incompatible(reason));
            }
        };

        if let Some(reason) = self.incompatibility(&metadata) {
            warn!(kind = R::KIND, %reason, "ignoring incompatible snapshot");
            return Ok(LoadOutcome::Incompatible(reason));
        }

        if checksum(&graph_bytes) != metadata.graph_checksum {
            return Err(IndexError::serialization(Artifact::Graph, "checksum mismatch"));
        }
        let payload_bytes = read_artifact(&paths, Artifact::Payloads)?.ok_or_else(|| {
            IndexError::persistence(
                Artifact::Payloads,
                paths.path(Artifact::Payloads),
                io::Error::new(io::ErrorKind::NotFound, "payload artifact missing"),
            )
        })?;
        if checksum(&payload_bytes) != metadata.payload_checksum {
            return Err(IndexError::serialization(Artifact::Payloads, "checksum mismatch"));
        }

        let graph = decode_graph::<R::Key>(&graph_bytes)?;
        let payloads = PayloadStore::from_records(R::decode_snapshot(&payload_bytes)?);
        let tombstones = graph
            .values
            .iter()
            .filter(|key| !payloads.contains(key))
            .cloned()
            .collect();
        let count = payloads.len();

        *self.state.write() = Generation {
            graph: GraphState::Persisted(graph),
            payloads,
            tombstones,
            built_at: metadata.built_at,
        };

        info!(
            kind = R::KIND,
            count,
            path = %paths.path(Artifact::Graph).display(),
            "loaded similarity index"
        );
        Ok(LoadOutcome::Loaded { count })
    }

    fn incompatibility(&self, metadata: &IndexMetadata) -> Option<String> {
        if metadata.kind != R::KIND {
            return Some(format!("{} snapshot (expected {})", metadata.kind, R::KIND));
        }
        if metadata.dimension != self.dimension {
            return Some(format!(
                "dimension {} (expected {})",
                metadata.dimension, self.dimension
            ));
        }
        None
    }
}

/// Exact nearest live items by payload embedding. Ties are ordered by key.
fn scan_payloads<R: IndexRecord>(
    payloads: &PayloadStore<R>,
    query: &[f32],
    limit: usize,
) -> Vec<Neighbor<R::Key>> {
    let mut hits: Vec<_> = payloads
        .iter()
        .filter(|record| !record.embedding().is_empty())
        .map(|record| {
            let distance = cosine_distance(query, record.embedding());
            Neighbor::new(record.key().clone(), distance)
        })
        .collect();
    hits.sort_by(|a, b| {
        OrderedFloat(a.distance)
            .cmp(&OrderedFloat(b.distance))
            .then_with(|| a.key.cmp(&b.key))
    });
    hits.truncate(limit);
    hits
}

fn graph_nodes<R: IndexRecord>(payloads: &PayloadStore<R>) -> Vec<(R::Key, EmbeddingPoint)> {
    payloads
        .iter()
        .filter(|record| !record.embedding().is_empty())
        .map(|record| (record.key().clone(), EmbeddingPoint::new(record.embedding())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ImageEmbeddingRecord;
    use tempfile::tempdir;

    fn index(dimension: usize) -> SimilarityIndex<ImageEmbeddingRecord> {
        let config = IndexConfig::builder().seed(11).compaction_threshold(4).build();
        SimilarityIndex::with_config(dimension, &config)
    }

    fn image(uid: &str, embedding: Vec<f32>) -> ImageEmbeddingRecord {
        ImageEmbeddingRecord::new(uid, embedding, "ViT-L-14", "openai")
    }

    fn keys(hits: &[Neighbor<String>]) -> Vec<&str> {
        hits.iter().map(|h| h.key.as_str()).collect()
    }

    #[test]
    fn search_before_build_is_not_ready() {
        let index = index(2);
        assert!(matches!(index.search(&[1.0, 0.0], 3), Err(IndexError::NotReady)));
        assert!(matches!(
            index.search_within(&[1.0, 0.0], 3, 0.5),
            Err(IndexError::NotReady)
        ));
    }

    #[test]
    fn build_and_search() {
        let index = index(2);
        let count = index
            .build([
                image("a", vec![1.0, 0.0]),
                image("b", vec![0.0, 1.0]),
                image("c", vec![0.7, 0.7]),
            ])
            .unwrap();
        assert_eq!(count, 3);

        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(keys(&hits), ["a", "c"]);
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn build_skips_empty_embeddings() {
        let index = index(2);
        let count = index
            .build([image("a", vec![1.0, 0.0]), image("b", Vec::new())])
            .unwrap();

        assert_eq!(count, 1);
        assert!(!index.contains(&"b".to_string()));
        assert_eq!(keys(&index.search(&[0.0, 1.0], 5).unwrap()), ["a"]);
    }

    #[test]
    fn build_with_only_empty_embeddings_is_not_ready() {
        let index = index(2);
        assert_eq!(index.build([image("a", Vec::new())]).unwrap(), 0);
        assert!(index.is_empty());
        assert!(!index.is_ready());
    }

    #[test]
    fn build_with_nothing_resets() {
        let index = index(2);
        index.build([image("a", vec![1.0, 0.0])]).unwrap();
        index.build(Vec::new()).unwrap();

        assert!(index.is_empty());
        assert!(matches!(index.search(&[1.0, 0.0], 1), Err(IndexError::NotReady)));
    }

    #[test]
    fn dimension_mismatch_keeps_previous_generation() {
        let index = index(2);
        index.build([image("a", vec![1.0, 0.0])]).unwrap();

        let result = index.build([image("b", vec![1.0, 0.0, 0.0])]);
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert!(index.contains(&"a".to_string()));
        assert!(matches!(
            index.add(image("c", vec![1.0])),
            Err(IndexError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn add_creates_graph_lazily() {
        let index = index(2);
        assert!(index.add(image("a", vec![1.0, 0.0])).unwrap());
        assert!(!index.add(image("b", Vec::new())).unwrap());

        assert_eq!(index.len(), 1);
        assert_eq!(keys(&index.search(&[1.0, 0.1], 3).unwrap()), ["a"]);
    }

    #[test]
    fn add_compacts_after_threshold() {
        let index = index(2);
        for i in 0..4 {
            let angle = i as f32 * 0.3;
            index
                .add(image(&format!("p{i}"), vec![angle.cos(), angle.sin()]))
                .unwrap();
        }

        let stats = index.stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.nodes, 4);
        assert_eq!(keys(&index.search(&[1.0, 0.0], 1).unwrap()), ["p0"]);
    }

    #[test]
    fn re_adding_with_new_embedding_moves_the_item() {
        let index = index(2);
        index
            .build([image("a", vec![1.0, 0.0]), image("b", vec![0.0, 1.0])])
            .unwrap();

        index.add(image("a", vec![0.0, -1.0])).unwrap();

        // No rebuild: the new vector waits in the buffer, the old node is hidden.
        let stats = index.stats();
        assert_eq!(index.len(), 2);
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.superseded, 1);

        let hits = index.search(&[0.0, -1.0], 1).unwrap();
        assert_eq!(keys(&hits), ["a"]);
        assert!(hits[0].distance.abs() < 1e-6);
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(keys(&hits), ["b", "a"]);
        assert!(hits.iter().all(|hit| hit.distance > 0.5));

        index.compact();
        assert_eq!(index.stats().nodes, 2);
        assert_eq!(index.stats().superseded, 0);
    }

    #[test]
    fn soft_delete_hides_item() {
        let index = index(2);
        index
            .build([image("a", vec![1.0, 0.0]), image("b", vec![0.9, 0.1])])
            .unwrap();

        assert!(index.soft_delete(&"a".to_string()));
        assert!(!index.soft_delete(&"a".to_string()));

        assert_eq!(index.len(), 1);
        assert!(index.get(&"a".to_string()).is_none());
        assert_eq!(index.stats().tombstones, 1);
        assert_eq!(index.stats().nodes, 2);
        assert_eq!(keys(&index.search(&[1.0, 0.0], 2).unwrap()), ["b"]);
        assert_eq!(keys(&index.search_within(&[1.0, 0.0], 2, 1.0).unwrap()), ["b"]);
    }

    #[test]
    fn re_adding_deleted_item_replaces_stale_node() {
        let index = index(2);
        index
            .build([image("a", vec![1.0, 0.0]), image("b", vec![0.0, 1.0])])
            .unwrap();
        index.soft_delete(&"a".to_string());

        index.add(image("a", vec![0.0, 1.0])).unwrap();

        let stats = index.stats();
        assert_eq!(stats.tombstones, 0);
        assert_eq!(stats.superseded, 1);
        assert_eq!(index.len(), 2);
        let hits = index.search_within(&[1.0, 0.0], 5, 0.5).unwrap();
        assert!(hits.is_empty());
        assert_eq!(index.search(&[0.0, 1.0], 2).unwrap().len(), 2);
    }

    #[test]
    fn compact_drops_deleted_nodes() {
        let index = index(2);
        index
            .build([image("a", vec![1.0, 0.0]), image("b", vec![0.0, 1.0])])
            .unwrap();
        index.soft_delete(&"b".to_string());

        index.compact();

        let stats = index.stats();
        assert_eq!(stats.nodes, 1);
        assert_eq!(stats.tombstones, 0);
    }

    #[test]
    fn search_within_respects_threshold_and_k() {
        let index = index(2);
        index
            .build([
                image("a", vec![1.0, 0.0]),
                image("b", vec![0.99, 0.14]),
                image("c", vec![0.95, 0.31]),
                image("d", vec![0.0, 1.0]),
            ])
            .unwrap();

        let hits = index.search_within(&[1.0, 0.0], 2, 0.5).unwrap();
        assert_eq!(keys(&hits), ["a", "b"]);

        let hits = index.search_within(&[1.0, 0.0], 10, 0.5).unwrap();
        assert_eq!(keys(&hits), ["a", "b", "c"]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(hits.iter().all(|h| h.distance < 0.5));

        assert!(index.search_within(&[1.0, 0.0], 0, 0.5).unwrap().is_empty());
    }

    #[test]
    fn neighbors_of_excludes_self() {
        let index = index(2);
        index
            .build([
                image("a", vec![1.0, 0.0]),
                image("b", vec![0.99, 0.14]),
                image("d", vec![0.0, 1.0]),
            ])
            .unwrap();

        let hits = index.neighbors_of(&"a".to_string(), 5, 0.5).unwrap();
        assert_eq!(keys(&hits), ["b"]);
        assert!(index.neighbors_of(&"zzz".to_string(), 5, 0.5).unwrap().is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("images.hnsw");

        let index = index(2);
        index
            .build([image("a", vec![1.0, 0.0]), image("b", vec![0.0, 1.0])])
            .unwrap();
        assert_eq!(index.save(&base).unwrap(), SaveOutcome::Saved { count: 2 });

        let restored = self::index(2);
        assert_eq!(restored.load(&base).unwrap(), LoadOutcome::Loaded { count: 2 });

        assert_eq!(restored.get(&"a".to_string()), index.get(&"a".to_string()));
        assert_eq!(restored.built_at(), index.built_at());
        assert_eq!(keys(&restored.search(&[0.1, 1.0], 1).unwrap()), ["b"]);
    }

    #[test]
    fn save_compacts_pending_inserts() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("images.hnsw");

        let index = index(2);
        index.add(image("a", vec![1.0, 0.0])).unwrap();
        index.save(&base).unwrap();
        assert_eq!(index.stats().pending, 0);

        let restored = self::index(2);
        restored.load(&base).unwrap();
        assert_eq!(keys(&restored.search(&[1.0, 0.0], 1).unwrap()), ["a"]);
    }

    #[test]
    fn soft_deleted_items_stay_hidden_after_reload() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("images.hnsw");

        let index = index(2);
        index
            .build([image("a", vec![1.0, 0.0]), image("b", vec![0.9, 0.2])])
            .unwrap();
        index.soft_delete(&"a".to_string());
        index.save(&base).unwrap();

        let restored = self::index(2);
        restored.load(&base).unwrap();

        assert_eq!(restored.len(), 1);
        assert_eq!(restored.stats().tombstones, 1);
        assert_eq!(keys(&restored.search(&[1.0, 0.0], 2).unwrap()), ["b"]);
    }

    #[test]
    fn add_after_load_promotes_graph() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("images.hnsw");

        let index = index(2);
        index.build([image("a", vec![1.0, 0.0])]).unwrap();
        index.save(&base).unwrap();

        let restored = self::index(2);
        restored.load(&base).unwrap();
        restored.add(image("b", vec![0.0, 1.0])).unwrap();

        assert_eq!(restored.stats().pending, 1);
        assert_eq!(keys(&restored.search(&[0.0, 1.0], 1).unwrap()), ["b"]);
        assert_eq!(keys(&restored.search(&[1.0, 0.0], 1).unwrap()), ["a"]);
    }

    #[test]
    fn load_missing_is_not_an_error() {
        let dir = tempdir().unwrap();
        let index = index(2);
        assert_eq!(
            index.load(dir.path().join("absent.hnsw")).unwrap(),
            LoadOutcome::Missing
        );
        assert!(!index.is_ready());
    }

    #[test]
    fn load_rejects_other_dimension() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("images.hnsw");

        let index = index(2);
        index.build([image("a", vec![1.0, 0.0])]).unwrap();
        index.save(&base).unwrap();

        let other = self::index(3);
        assert!(matches!(other.load(&base).unwrap(), LoadOutcome::Incompatible(_)));
        assert!(other.is_empty());
    }

    #[test]
    fn load_detects_corrupt_payloads() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("images.hnsw");

        let index = index(2);
        index.build([image("a", vec![1.0, 0.0])]).unwrap();
        index.save(&base).unwrap();

        let payloads = ArtifactPaths::new(&base).path(Artifact::Payloads).to_path_buf();
        std::fs::write(&payloads, b"tampered").unwrap();

        let restored = self::index(2);
        let err = restored.load(&base).unwrap_err();
        assert!(matches!(
            err,
            IndexError::Serialization {
                artifact: Artifact::Payloads,
                ..
            }
        ));
        assert!(restored.is_empty());
        assert!(!restored.is_ready());
    }

    #[test]
    fn load_without_payloads_names_the_artifact() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("images.hnsw");

        let index = index(2);
        index.build([image("a", vec![1.0, 0.0])]).unwrap();
        index.save(&base).unwrap();
        std::fs::remove_file(ArtifactPaths::new(&base).path(Artifact::Payloads)).unwrap();

        let err = self::index(2).load(&base).unwrap_err();
        assert!(matches!(
            err,
            IndexError::Persistence {
                artifact: Artifact::Payloads,
                ..
            }
        ));
    }

    /// `count` images on the upper unit half-circle, `p0000` closest to `[1, 0]`.
    fn arc(count: usize) -> Vec<ImageEmbeddingRecord> {
        (0..count)
            .map(|i| {
                let angle = i as f32 * 0.005;
                image(&format!("p{i:04}"), vec![angle.cos(), angle.sin()])
            })
            .collect()
    }

    fn small_ef_index() -> SimilarityIndex<ImageEmbeddingRecord> {
        let config = IndexConfig::builder().seed(11).ef_search(20).build();
        SimilarityIndex::with_config(2, &config)
    }

    #[test]
    fn k_beyond_ef_search_returns_k_hits() {
        let index = small_ef_index();
        index.build(arc(400)).unwrap();

        let hits = index.search(&[1.0, 0.0], 50).unwrap();
        assert_eq!(hits.len(), 50);
        assert_eq!(hits[0].key, "p0000");
        assert_eq!(hits[49].key, "p0049");
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

        let hits = index.search(&[1.0, 0.0], 300).unwrap();
        assert_eq!(hits.len(), 300);

        let within = index.search_within(&[1.0, 0.0], 30, 2.0).unwrap();
        assert_eq!(within.len(), 30);
        assert_eq!(within[29].key, "p0029");
    }

    #[test]
    fn tombstones_beyond_ef_search_still_yield_live_hits() {
        let index = small_ef_index();
        index.build(arc(400)).unwrap();
        for i in 0..9 {
            assert!(index.soft_delete(&format!("p{i:04}")));
        }
        assert_eq!(index.stats().tombstones, 9);

        let hits = index.search(&[1.0, 0.0], 15).unwrap();
        assert_eq!(hits.len(), 15);
        assert_eq!(hits[0].key, "p0009");
        assert!(hits.iter().all(|hit| index.contains(&hit.key)));
    }

    #[test]
    fn deleting_the_nearest_block_keeps_search_useful() {
        let config = IndexConfig::builder().seed(11).build();
        let index = SimilarityIndex::<ImageEmbeddingRecord>::with_config(2, &config);
        index.build(arc(400)).unwrap();

        for i in 0..250 {
            index.soft_delete(&format!("p{i:04}"));
        }

        assert_eq!(index.len(), 150);
        assert!(index.stats().tombstones < 200);
        let hits = index.search(&[1.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 10);
        assert_eq!(hits[0].key, "p0250");
        assert!(hits.iter().all(|hit| index.contains(&hit.key)));
    }

    #[test]
    fn many_deletes_compact_the_graph() {
        let index = index(2);
        index.build(arc(10)).unwrap();
        for i in 0..4 {
            index.soft_delete(&format!("p{i:04}"));
        }

        let stats = index.stats();
        assert_eq!(stats.tombstones, 0);
        assert_eq!(stats.nodes, 6);
    }

    #[test]
    fn load_treats_other_format_version_as_incompatible() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("images.hnsw");

        let index = index(2);
        index.build([image("a", vec![1.0, 0.0])]).unwrap();
        index.save(&base).unwrap();
        let metadata = ArtifactPaths::new(&base).path(Artifact::Metadata).to_path_buf();
        std::fs::write(&metadata, br#"{"version": 2, "renamed": true}"#).unwrap();

        let restored = self::index(2);
        assert!(matches!(restored.load(&base).unwrap(), LoadOutcome::Incompatible(_)));
        assert!(!restored.is_ready());
    }

    #[test]
    fn readers_see_consistent_generations_during_writes() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let index = index(2);
        let built = AtomicBool::new(false);
        let done = AtomicBool::new(false);
        let stable = |i: usize| image(&format!("s{i}"), vec![1.0, i as f32 * 0.1]);
        let churn = |i: usize| image(&format!("c{i}"), vec![i as f32 * 0.1, 1.0]);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while !done.load(Ordering::Acquire) {
                        let was_built = built.load(Ordering::Acquire);
                        let results = [
                            index.search(&[1.0, 0.2], 5),
                            index.search_within(&[0.2, 1.0], 5, 1.5),
                        ];
                        for result in results {
                            match result {
                                Ok(hits) => {
                                    for hit in hits {
                                        match hit.key.chars().next() {
                                            Some('s') => assert!(index.get(&hit.key).is_some()),
                                            Some('c') => {}
                                            _ => panic!("unknown key {}", hit.key),
                                        }
                                    }
                                }
                                Err(IndexError::NotReady) => assert!(!was_built),
                                Err(other) => panic!("unexpected error: {other}"),
                            }
                        }
                    }
                });
            }

            scope.spawn(|| {
                for round in 0..30 {
                    index
                        .build((0..8).map(stable).chain((0..4).map(churn)))
                        .unwrap();
                    built.store(true, Ordering::Release);
                    for i in 0..4 {
                        index.soft_delete(&format!("c{i}"));
                        index.add(churn(i + round % 3)).unwrap();
                    }
                    index.add(stable(round % 8)).unwrap();
                }
                done.store(true, Ordering::Release);
            });
        });

        assert!(index.is_ready());
        assert!((0..8).all(|i| index.contains(&format!("s{i}"))));
    }

    #[test]
    fn concurrent_save_and_load_never_see_a_torn_snapshot() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("images.hnsw");

        let index = index(2);
        index.build(arc(20)).unwrap();
        index.save(&base).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..20 {
                    index.add(image(&format!("x{i}"), vec![0.0, 1.0])).unwrap();
                    index.save(&base).unwrap();
                }
            });
            scope.spawn(|| {
                for _ in 0..20 {
                    assert!(matches!(
                        index.load(&base).unwrap(),
                        LoadOutcome::Loaded { .. }
                    ));
                }
            });
        });
    }
}
