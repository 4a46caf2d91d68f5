//! Cosine distance and the point type stored in graph nodes.

use instant_distance::Point;
use serde::{Deserialize, Serialize};

/// Computes cosine similarity between two vectors.
///
/// Zero-length or zero-norm inputs have similarity `0.0`.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (lhs, rhs) in a.iter().zip(b) {
        dot += lhs * rhs;
        norm_a += lhs * lhs;
        norm_b += rhs * rhs;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Cosine distance, `1 - cosine_similarity`.
///
/// `0.0` means identical direction and `2.0` opposite direction.
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// A graph node's copy of an embedding vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct EmbeddingPoint(pub(crate) Vec<f32>);

impl EmbeddingPoint {
    pub(crate) fn new(embedding: &[f32]) -> Self {
        Self(embedding.to_vec())
    }

    pub(crate) fn distance_to(&self, query: &[f32]) -> f32 {
        cosine_distance(&self.0, query)
    }
}

impl Point for EmbeddingPoint {
    fn distance(&self, other: &Self) -> f32 {
        cosine_distance(&self.0, &other.0)
    }
}
