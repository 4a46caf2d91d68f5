//! Graph representations behind an index generation.
//!
//! `instant-distance` builds immutable HNSW graphs. A freshly built graph
//! accepts inserts through a small buffer that is scanned exhaustively and
//! folded into the graph on compaction. A graph loaded from disk is read-only
//! until the first insert promotes it.

use instant_distance::{Builder, HnswMap, Search};
use ordered_float::OrderedFloat;
use std::collections::HashSet;

use crate::config::GraphParams;
use crate::distance::EmbeddingPoint;
use crate::error::{IndexError, Result};
use crate::types::{IndexKey, Neighbor};

/// HNSW graph whose node values are index keys.
pub(crate) type Graph<K> = HnswMap<EmbeddingPoint, K>;

/// Builds a graph from `(key, point)` pairs. Returns `None` for no nodes.
pub(crate) fn build_graph<K: IndexKey>(
    params: &GraphParams,
    nodes: Vec<(K, EmbeddingPoint)>,
) -> Option<Graph<K>> {
    if nodes.is_empty() {
        return None;
    }

    let (keys, points): (Vec<K>, Vec<EmbeddingPoint>) = nodes.into_iter().unzip();

    let mut builder = Builder::default()
        .ef_construction(params.ef_construction)
        .ef_search(params.ef_search)
        .ml(params.level_factor);
    if let Some(seed) = params.seed {
        builder = builder.seed(seed);
    }

    Some(builder.build(points, keys))
}

/// Insert-capable graph: an optional built base plus an insert buffer.
pub(crate) struct FreshGraph<K> {
    base: Option<Graph<K>>,
    pending: Vec<(K, EmbeddingPoint)>,
    /// Keys whose base node is outdated; their current vector is in `pending`.
    superseded: HashSet<K>,
}

impl<K: IndexKey> FreshGraph<K> {
    pub(crate) fn from_base(base: Option<Graph<K>>) -> Self {
        Self {
            base,
            pending: Vec::new(),
            superseded: HashSet::new(),
        }
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Which graph, if any, is authoritative for an index generation.
pub(crate) enum GraphState<K> {
    /// Nothing built or loaded. Searches fail with `NotReady`.
    Empty,
    /// Built in this process; accepts inserts.
    Fresh(FreshGraph<K>),
    /// Deserialized from disk; read-only until promoted by an insert.
    Persisted(Graph<K>),
}

impl<K> std::fmt::Debug for GraphState<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Fresh(fresh) => f
                .debug_struct("Fresh")
                .field("base_nodes", &fresh.base.as_ref().map_or(0, |g| g.values.len()))
                .field("pending", &fresh.pending.len())
                .field("superseded", &fresh.superseded.len())
                .finish(),
            Self::Persisted(graph) => f
                .debug_struct("Persisted")
                .field("nodes", &graph.values.len())
                .finish(),
        }
    }
}

impl<K: IndexKey> GraphState<K> {
    /// Wraps a newly built graph as a fresh generation, or `Empty` for none.
    pub(crate) fn fresh(base: Option<Graph<K>>) -> Self {
        match base {
            Some(graph) => Self::Fresh(FreshGraph::from_base(Some(graph))),
            None => Self::Empty,
        }
    }

    pub(crate) const fn is_ready(&self) -> bool {
        !matches!(self, Self::Empty)
    }

    /// Physical node count, including nodes whose payload was soft-deleted.
    pub(crate) fn node_count(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Fresh(fresh) => {
                fresh.base.as_ref().map_or(0, |g| g.values.len()) + fresh.pending.len()
            }
            Self::Persisted(graph) => graph.values.len(),
        }
    }

    /// Items inserted since the base graph was built.
    pub(crate) fn pending_len(&self) -> usize {
        match self {
            Self::Fresh(fresh) => fresh.pending_len(),
            Self::Empty | Self::Persisted(_) => 0,
        }
    }

    /// Base nodes hidden because their key was re-added with a new vector.
    pub(crate) fn superseded_len(&self) -> usize {
        match self {
            Self::Fresh(fresh) => fresh.superseded.len(),
            Self::Empty | Self::Persisted(_) => 0,
        }
    }

    /// Runs `f` on the insert-capable form of the state. An empty state
    /// becomes fresh, a persisted graph is promoted to the base of a fresh one.
    fn with_fresh(&mut self, f: impl FnOnce(&mut FreshGraph<K>)) {
        let mut fresh = match std::mem::replace(self, Self::Empty) {
            Self::Empty => FreshGraph::from_base(None),
            Self::Fresh(fresh) => fresh,
            Self::Persisted(graph) => FreshGraph::from_base(Some(graph)),
        };
        f(&mut fresh);
        *self = Self::Fresh(fresh);
    }

    /// Appends a node for a key the graph has never seen.
    pub(crate) fn insert(&mut self, key: K, point: EmbeddingPoint) {
        self.with_fresh(|fresh| fresh.pending.push((key, point)));
    }

    /// Gives `key` a new vector without rebuilding. Any base node for `key` is
    /// hidden from searches until the next compaction.
    pub(crate) fn supersede(&mut self, key: K, point: EmbeddingPoint) {
        self.with_fresh(|fresh| {
            if let Some(slot) = fresh.pending.iter_mut().find(|(pending, _)| *pending == key) {
                slot.1 = point;
            } else {
                fresh.superseded.insert(key.clone());
                fresh.pending.push((key, point));
            }
        });
    }

    /// The single graph to export. `None` when empty or when inserts have
    /// not been compacted into the base yet.
    pub(crate) fn exportable(&self) -> Option<&Graph<K>> {
        match self {
            Self::Persisted(graph) => Some(graph),
            Self::Fresh(FreshGraph {
                base: Some(graph),
                pending,
                ..
            }) if pending.is_empty() => Some(graph),
            Self::Empty | Self::Fresh(_) => None,
        }
    }

    /// Up to `limit` nodes nearest to `query`, by ascending distance.
    ///
    /// Distances come from each node's own stored vector. Nodes may belong to
    /// soft-deleted keys; filtering is the caller's job.
    pub(crate) fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<Neighbor<K>>> {
        let empty = HashSet::new();
        let (base, pending, superseded) = match self {
            Self::Empty => return Err(IndexError::NotReady),
            Self::Fresh(fresh) => (
                fresh.base.as_ref(),
                fresh.pending.as_slice(),
                &fresh.superseded,
            ),
            Self::Persisted(graph) => (Some(graph), &[][..], &empty),
        };

        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();

        if let Some(graph) = base {
            let query_point = EmbeddingPoint::new(query);
            let mut search = Search::default();
            hits.extend(
                graph
                    .search(&query_point, &mut search)
                    .filter(|item| !superseded.contains(item.value))
                    .take(limit)
                    .map(|item| Neighbor::new(item.value.clone(), item.point.distance_to(query))),
            );
        }

        hits.extend(
            pending
                .iter()
                .map(|(key, point)| Neighbor::new(key.clone(), point.distance_to(query))),
        );

        hits.sort_by_key(|hit| OrderedFloat(hit.distance));
        hits.truncate(limit);
        Ok(hits)
    }
}
