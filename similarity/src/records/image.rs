//! Whole-image embedding records.

use chrono::{DateTime, Utc};
use rkyv::rancor::Error as RkyvError;
use rkyv::{from_bytes, to_bytes};
use serde::{Deserialize, Serialize};

use crate::error::{Artifact, IndexError, Result};
use crate::types::IndexRecord;

/// Embedding of a whole photo plus the model that produced it.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct ImageEmbeddingRecord {
    /// Photo uid in the photo server.
    pub photo_uid: String,
    /// Image embedding. Empty when not computed yet.
    pub embedding: Vec<f32>,
    /// Model name, e.g. `ViT-L-14`.
    pub model: String,
    /// Pretrained weights / model version tag.
    pub model_version: String,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at_ms: i64,
}

impl ImageEmbeddingRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        photo_uid: impl Into<String>,
        embedding: Vec<f32>,
        model: impl Into<String>,
        model_version: impl Into<String>,
    ) -> Self {
        Self {
            photo_uid: photo_uid.into(),
            embedding,
            model: model.into(),
            model_version: model_version.into(),
            created_at_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Creation time, if the stored timestamp is representable.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.created_at_ms)
    }
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
struct ImageSnapshot {
    records: Vec<ImageEmbeddingRecord>,
}

impl IndexRecord for ImageEmbeddingRecord {
    type Key = String;

    const KIND: &'static str = "image";

    fn key(&self) -> &String {
        &self.photo_uid
    }

    fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    fn encode_snapshot(records: &[Self]) -> Result<Vec<u8>> {
        let snapshot = ImageSnapshot {
            records: records.to_vec(),
        };
        let bytes = to_bytes::<RkyvError>(&snapshot)
            .map_err(|e| IndexError::serialization(Artifact::Payloads, e))?;
        Ok(bytes.to_vec())
    }

    fn decode_snapshot(bytes: &[u8]) -> Result<Vec<Self>> {
        let snapshot = from_bytes::<ImageSnapshot, RkyvError>(&super::aligned(bytes))
            .map_err(|e| IndexError::serialization(Artifact::Payloads, e))?;
        Ok(snapshot.records)
    }
}
