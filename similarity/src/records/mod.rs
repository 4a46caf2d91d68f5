//! Payload records for the two indexes.

mod face;
mod image;

pub use face::{BoundingBox, FaceRecord, IdentityLink};
pub use image::ImageEmbeddingRecord;

use rkyv::util::AlignedVec;

/// Copies archived bytes into an aligned buffer before validation.
///
/// Bytes read from disk carry no alignment guarantee.
fn aligned(bytes: &[u8]) -> AlignedVec {
    let mut buffer = AlignedVec::with_capacity(bytes.len());
    buffer.extend_from_slice(bytes);
    buffer
}
