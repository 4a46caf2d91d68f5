//! Configuration for the similarity indexes.

use serde::Deserialize;
use std::path::PathBuf;

/// Embedding dimension of face vectors.
pub const FACE_DIMENSION: usize = 512;

/// Default embedding dimension of whole-image vectors.
pub const DEFAULT_IMAGE_DIMENSION: usize = 768;

/// Neighbor fan-out of the HNSW graph. Fixed by the graph engine.
pub const NEIGHBOR_FANOUT: usize = 32;

/// Tuning knobs for graph construction and search.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GraphParams {
    /// Candidate list size while building the graph.
    pub ef_construction: usize,
    /// Candidate list size while searching. Also caps how many raw
    /// candidates a single search can see.
    pub ef_search: usize,
    /// Fraction of nodes promoted to each higher layer.
    pub level_factor: f32,
    /// Seed for layer assignment. `None` picks a random seed per build.
    pub seed: Option<u64>,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            ef_construction: 100,
            ef_search: 200,
            level_factor: 1.0 / NEIGHBOR_FANOUT as f32,
            seed: None,
        }
    }
}

/// Configuration for both indexes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Base path of the persisted face index. `None` disables persistence.
    pub face_index_path: Option<PathBuf>,
    /// Base path of the persisted image index. `None` disables persistence.
    pub image_index_path: Option<PathBuf>,
    /// Whether the face index is active at all.
    pub faces_enabled: bool,
    /// Whether the image index is active at all.
    pub images_enabled: bool,
    /// Dimension of whole-image embeddings.
    pub image_dimension: usize,
    /// Whether to save to disk after every rebuild.
    pub auto_save: bool,
    /// Items added since the last graph build before the graph is rebuilt.
    pub compaction_threshold: usize,
    /// Graph construction and search parameters.
    pub graph: GraphParams,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            face_index_path: None,
            image_index_path: None,
            faces_enabled: true,
            images_enabled: true,
            image_dimension: DEFAULT_IMAGE_DIMENSION,
            auto_save: true,
            compaction_threshold: 256,
            graph: GraphParams::default(),
        }
    }
}

impl IndexConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> IndexConfigBuilder {
        IndexConfigBuilder::new()
    }
}

/// Builder for [`IndexConfig`].
#[derive(Debug, Default)]
pub struct IndexConfigBuilder {
    config: IndexConfig,
}

impl IndexConfigBuilder {
    /// Creates a new configuration builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: IndexConfig::default(),
        }
    }

    /// Sets the face index base path.
    #[must_use]
    pub fn face_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.face_index_path = Some(path.into());
        self
    }

    /// Sets the image index base path.
    #[must_use]
    pub fn image_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.image_index_path = Some(path.into());
        self
    }

    /// Enables or disables the face index.
    #[must_use]
    pub const fn faces_enabled(mut self, enabled: bool) -> Self {
        self.config.faces_enabled = enabled;
        self
    }

    /// Enables or disables the image index.
    #[must_use]
    pub const fn images_enabled(mut self, enabled: bool) -> Self {
        self.config.images_enabled = enabled;
        self
    }

    /// Sets the whole-image embedding dimension.
    #[must_use]
    pub const fn image_dimension(mut self, dimension: usize) -> Self {
        self.config.image_dimension = dimension;
        self
    }

    /// Enables or disables saving after every rebuild.
    #[must_use]
    pub const fn auto_save(mut self, enabled: bool) -> Self {
        self.config.auto_save = enabled;
        self
    }

    /// Sets how many incremental inserts trigger a graph rebuild.
    #[must_use]
    pub const fn compaction_threshold(mut self, threshold: usize) -> Self {
        self.config.compaction_threshold = threshold;
        self
    }

    /// Sets the search candidate list size.
    #[must_use]
    pub const fn ef_search(mut self, ef: usize) -> Self {
        self.config.graph.ef_search = ef;
        self
    }

    /// Sets the construction candidate list size.
    #[must_use]
    pub const fn ef_construction(mut self, ef: usize) -> Self {
        self.config.graph.ef_construction = ef;
        self
    }

    /// Fixes the layer assignment seed, making builds reproducible.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.config.graph.seed = Some(seed);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> IndexConfig {
        self.config
    }
}
