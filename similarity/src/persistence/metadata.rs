//! Metadata descriptor written next to a persisted graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Artifact, IndexError, Result};
use crate::source::SourceStats;

/// Version of the on-disk format. Snapshots with another version are treated
/// as absent.
pub const FORMAT_VERSION: u32 = 1;

/// Descriptor of a persisted index generation, used only for staleness checks
/// and artifact verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Format version tag.
    pub version: u32,
    /// Index kind, `"face"` or `"image"`.
    pub kind: String,
    /// Number of payload records.
    pub count: usize,
    /// Highest row id (faces only).
    pub max_id: Option<i64>,
    /// Embedding dimension of the index.
    pub dimension: usize,
    /// When this generation was built.
    pub built_at: DateTime<Utc>,
    /// xxh3 checksum of the graph artifact.
    pub graph_checksum: u64,
    /// xxh3 checksum of the payload artifact.
    pub payload_checksum: u64,
}

/// Only the version tag, readable whatever the rest of the layout is.
#[derive(Deserialize)]
struct VersionTag {
    version: u32,
}

/// A metadata file as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredMetadata {
    /// Written by this format version.
    Current(IndexMetadata),
    /// Written by another format version; the rest of the file is not parsed.
    OtherVersion(u32),
}

impl StoredMetadata {
    /// Parses the version tag first and the full descriptor only if the
    /// version matches [`FORMAT_VERSION`].
    pub(crate) fn from_json(bytes: &[u8]) -> Result<Self> {
        let tag: VersionTag = serde_json::from_slice(bytes)
            .map_err(|e| IndexError::serialization(Artifact::Metadata, e))?;
        if tag.version != FORMAT_VERSION {
            return Ok(Self::OtherVersion(tag.version));
        }
        IndexMetadata::from_json(bytes).map(Self::Current)
    }

    /// Compares with the store's aggregates. Another version is always stale.
    #[must_use]
    pub fn compare(&self, current: &SourceStats) -> Staleness {
        match self {
            Self::Current(metadata) => metadata.compare(current),
            Self::OtherVersion(found) => Staleness::Stale(StaleReason::Version { found: *found }),
        }
    }
}

impl IndexMetadata {
    pub(crate) fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| IndexError::serialization(Artifact::Metadata, e))
    }

    pub(crate) fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| IndexError::serialization(Artifact::Metadata, e))
    }

    /// Compares this snapshot against the store's current aggregates.
    #[must_use]
    pub fn compare(&self, current: &SourceStats) -> Staleness {
        if self.version != FORMAT_VERSION {
            return Staleness::Stale(StaleReason::Version {
                found: self.version,
            });
        }
        if self.count != current.count {
            return Staleness::Stale(StaleReason::Count {
                persisted: self.count,
                current: current.count,
            });
        }
        if self.max_id != current.max_id {
            return Staleness::Stale(StaleReason::HighWaterMark {
                persisted: self.max_id,
                current: current.max_id,
            });
        }
        Staleness::Fresh
    }
}

/// Outcome of comparing a persisted snapshot with the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// The snapshot matches the store and can be loaded.
    Fresh,
    /// The snapshot no longer matches and the index must be rebuilt.
    Stale(StaleReason),
    /// There is no usable snapshot.
    Missing,
}

impl Staleness {
    /// Returns `true` if the snapshot can be loaded as is.
    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// Why a snapshot is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// Written by another format version.
    Version {
        /// Version found on disk.
        found: u32,
    },
    /// Item count differs.
    Count {
        /// Count recorded on disk.
        persisted: usize,
        /// Count reported by the store.
        current: usize,
    },
    /// Highest row id differs.
    HighWaterMark {
        /// Mark recorded on disk.
        persisted: Option<i64>,
        /// Mark reported by the store.
        current: Option<i64>,
    },
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Version { found } => {
                write!(f, "format version {found}, expected {FORMAT_VERSION}")
            }
            Self::Count { persisted, current } => {
                write!(f, "count changed from {persisted} to {current}")
            }
            Self::HighWaterMark { persisted, current } => {
                write!(f, "max id changed from {persisted:?} to {current:?}")
            }
        }
    }
}
