//! Face embedding index keyed by face row id.

use tracing::debug;

use super::SimilarityIndex;
use crate::config::{FACE_DIMENSION, IndexConfig};
use crate::records::{FaceRecord, IdentityLink};

/// Index over 512-dimensional face embeddings.
pub type FaceIndex = SimilarityIndex<FaceRecord>;

impl SimilarityIndex<FaceRecord> {
    /// Creates an empty face index.
    #[must_use]
    pub fn for_faces(config: &IndexConfig) -> Self {
        Self::with_config(FACE_DIMENSION, config)
    }

    /// Replaces the marker/subject linkage of an indexed face in place.
    ///
    /// The embedding and the graph are untouched.
    ///
    /// # Returns
    /// `false` if the face is not indexed.
    pub fn patch_identity(&self, face_id: i64, link: IdentityLink) -> bool {
        let found = self.patch_payload(&face_id, |face| face.identity = link);
        if found {
            debug!(face_id, "patched face identity");
        }
        found
    }

    /// Ids of indexed faces linked to `subject_uid`, in ascending order.
    #[must_use]
    pub fn faces_of_subject(&self, subject_uid: &str) -> Vec<i64> {
        let state = self.state.read();
        let mut ids: Vec<i64> = state
            .payloads
            .iter()
            .filter(|face| face.identity.subject_uid.as_deref() == Some(subject_uid))
            .map(|face| face.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}
