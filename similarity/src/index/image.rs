//! Whole-image embedding index keyed by photo uid.

use super::SimilarityIndex;
use crate::config::IndexConfig;
use crate::records::ImageEmbeddingRecord;

/// Index over whole-image embeddings.
pub type ImageIndex = SimilarityIndex<ImageEmbeddingRecord>;

impl SimilarityIndex<ImageEmbeddingRecord> {
    /// Creates an empty image index with the configured dimension.
    #[must_use]
    pub fn for_images(config: &IndexConfig) -> Self {
        Self::with_config(config.image_dimension, config)
    }

    /// Photo uids whose embedding was produced by another model than
    /// `model`. Such photos are candidates for re-embedding.
    #[must_use]
    pub fn outdated_photos(&self, model: &str, model_version: &str) -> Vec<String> {
        let state = self.state.read();
        let mut uids: Vec<String> = state
            .payloads
            .iter()
            .filter(|record| record.model != model || record.model_version != model_version)
            .map(|record| record.photo_uid.clone())
            .collect();
        uids.sort_unstable();
        uids
    }
}
