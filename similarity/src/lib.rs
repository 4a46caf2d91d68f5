//! Approximate nearest-neighbor indexes for face and image embeddings.
//!
//! The [`FaceIndex`] and [`ImageIndex`] types keep an HNSW graph plus the
//! record payloads in memory, mirroring rows owned by an external store:
//! - [`SimilarityIndex::build`] – replace the contents from a full snapshot.
//! - [`SimilarityIndex::add`] / [`SimilarityIndex::soft_delete`] – mirror single rows.
//! - [`SimilarityIndex::search`] / [`SimilarityIndex::search_within`] – query by cosine distance.
//! - [`SimilarityIndex::save`] / [`SimilarityIndex::load`] – persist to three files and reload.
//!
//! The HNSW graph itself is immutable, so rows added after a build sit in a
//! small exhaustively-scanned buffer until the next compaction. Deleted rows
//! lose their payload immediately and their graph node on the next rebuild.
//!
//! [`ManagedIndex`] binds an index to its [`RecordSource`] and decides at
//! startup whether the snapshot on disk can be trusted.
//!
//! ```rust,no_run
//! use snapvault_similarity::{FaceIndex, FaceRecord, IndexConfig};
//!
//! # fn demo(embedding: Vec<f32>) -> snapvault_similarity::Result<()> {
//! let index = FaceIndex::for_faces(&IndexConfig::default());
//! index.build([FaceRecord::new(1, "photo-uid", embedding.clone())])?;
//! for hit in index.search(&embedding, 10)? {
//!     println!("face {} at distance {:.3}", hit.key, hit.distance);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
mod distance;
pub mod error;
mod graph;
pub mod index;
mod payload;
pub mod persistence;
pub mod records;
pub mod service;
pub mod source;
pub mod types;

pub use config::{GraphParams, IndexConfig, IndexConfigBuilder};
pub use distance::{cosine_distance, cosine_similarity};
pub use error::{Artifact, IndexError, Result};
pub use index::{FaceIndex, ImageIndex, IndexStats, LoadOutcome, SaveOutcome, SimilarityIndex};
pub use persistence::{Staleness, check_staleness};
pub use records::{BoundingBox, FaceRecord, IdentityLink, ImageEmbeddingRecord};
pub use service::{IndexCapability, IndexRegistry, ManagedIndex, SyncOutcome, WarmStart};
pub use source::{IdentityWriter, MemorySource, RecordSource, SourceStats};
pub use types::{IndexKey, IndexRecord, Neighbor};
