//! Face detection records.

use rkyv::rancor::Error as RkyvError;
use rkyv::{from_bytes, to_bytes};
use serde::{Deserialize, Serialize};

use crate::error::{Artifact, IndexError, Result};
use crate::types::IndexRecord;

/// Relative bounding box of a detected face, in `[0, 1]` photo coordinates.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct BoundingBox {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width.
    pub width: f32,
    /// Height.
    pub height: f32,
}

/// Identity fields of a face: which marker and subject it is linked to.
///
/// These never influence distance computation, so they can be patched on an
/// indexed face without rebuilding the graph.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct IdentityLink {
    /// Marker uid in the photo server, if the face was matched to one.
    pub marker_uid: Option<String>,
    /// Subject (person) uid, if known.
    pub subject_uid: Option<String>,
    /// Subject display name, if known.
    pub subject_name: Option<String>,
}

impl IdentityLink {
    /// Creates a link to a marker and subject.
    #[must_use]
    pub fn new(marker_uid: impl Into<String>, subject_uid: impl Into<String>) -> Self {
        Self {
            marker_uid: Some(marker_uid.into()),
            subject_uid: Some(subject_uid.into()),
            subject_name: None,
        }
    }

    /// Sets the subject display name.
    #[must_use]
    pub fn with_subject_name(mut self, name: impl Into<String>) -> Self {
        self.subject_name = Some(name.into());
        self
    }

    /// Returns `true` if the face is not linked to anything.
    #[must_use]
    pub const fn is_unlinked(&self) -> bool {
        self.marker_uid.is_none() && self.subject_uid.is_none()
    }
}

/// A detected face row together with its embedding.
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
pub struct FaceRecord {
    /// Database row id.
    pub id: i64,
    /// Photo the face was detected in.
    pub photo_uid: String,
    /// Marker/subject linkage.
    pub identity: IdentityLink,
    /// Detection confidence.
    pub det_score: f32,
    /// Face location within the photo.
    pub bbox: BoundingBox,
    /// Cached photo width in pixels.
    pub photo_width: u32,
    /// Cached photo height in pixels.
    pub photo_height: u32,
    /// Cached EXIF orientation of the photo.
    pub orientation: u8,
    /// Face embedding. Empty when the detection has no usable vector yet.
    pub embedding: Vec<f32>,
}

impl FaceRecord {
    /// Creates an unlinked face record.
    #[must_use]
    pub fn new(id: i64, photo_uid: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id,
            photo_uid: photo_uid.into(),
            identity: IdentityLink::default(),
            det_score: 0.0,
            bbox: BoundingBox::default(),
            photo_width: 0,
            photo_height: 0,
            orientation: 1,
            embedding,
        }
    }

    /// Sets the identity linkage.
    #[must_use]
    pub fn with_identity(mut self, identity: IdentityLink) -> Self {
        self.identity = identity;
        self
    }

    /// Sets detection score and bounding box.
    #[must_use]
    pub const fn with_detection(mut self, det_score: f32, bbox: BoundingBox) -> Self {
        self.det_score = det_score;
        self.bbox = bbox;
        self
    }

    /// Sets the cached photo geometry.
    #[must_use]
    pub const fn with_photo_geometry(mut self, width: u32, height: u32, orientation: u8) -> Self {
        self.photo_width = width;
        self.photo_height = height;
        self.orientation = orientation;
        self
    }
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
struct FaceSnapshot {
    records: Vec<FaceRecord>,
}

impl IndexRecord for FaceRecord {
    type Key = i64;

    const KIND: &'static str = "face";

    fn key(&self) -> &i64 {
        &self.id
    }

    fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    fn row_id(&self) -> Option<i64> {
        Some(self.id)
    }

    fn encode_snapshot(records: &[Self]) -> Result<Vec<u8>> {
        let snapshot = FaceSnapshot {
            records: records.to_vec(),
        };
        let bytes = to_bytes::<RkyvError>(&snapshot)
            .map_err(|e| IndexError::serialization(Artifact::Payloads, e))?;
        Ok(bytes.to_vec())
    }

    fn decode_snapshot(bytes: &[u8]) -> Result<Vec<Self>> {
        let snapshot = from_bytes::<FaceSnapshot, RkyvError>(&super::aligned(bytes))
            .map_err(|e| IndexError::serialization(Artifact::Payloads, e))?;
        Ok(snapshot.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_keeps_identity_and_geometry() {
        let face = FaceRecord::new(7, "ps1", vec![0.1, 0.2, 0.3])
            .with_identity(IdentityLink::new("mk1", "js1").with_subject_name("Jane"))
            .with_detection(0.93, BoundingBox { x: 0.1, y: 0.2, width: 0.3, height: 0.4 })
            .with_photo_geometry(4032, 3024, 6);

        let bytes = FaceRecord::encode_snapshot(std::slice::from_ref(&face)).unwrap();
        let decoded = FaceRecord::decode_snapshot(&bytes).unwrap();

        assert_eq!(decoded, vec![face]);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = FaceRecord::decode_snapshot(b"definitely not an archive").unwrap_err();
        assert!(matches!(
            err,
            IndexError::Serialization {
                artifact: Artifact::Payloads,
                ..
            }
        ));
    }

    #[test]
    fn unlinked_identity() {
        assert!(IdentityLink::default().is_unlinked());
        assert!(!IdentityLink::new("mk", "js").is_unlinked());
    }
}
