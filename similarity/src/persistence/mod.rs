//! On-disk layout and staleness checks for persisted indexes.
//!
//! A persisted index is three files sharing a base path `B`:
//!
//! | file | contents | format |
//! |---|---|---|
//! | `B` | HNSW graph (vectors and topology) | postcard |
//! | `B.meta.json` | [`IndexMetadata`] | JSON |
//! | `B.payloads` | payload records | rkyv |
//!
//! The metadata file is small and is the only one read by
//! [`check_staleness`], so deciding whether a snapshot can be trusted never
//! touches the graph or payloads.

mod graph;
mod metadata;

pub(crate) use graph::{decode_graph, encode_graph};
pub use metadata::{FORMAT_VERSION, IndexMetadata, StaleReason, Staleness, StoredMetadata};

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Artifact, IndexError, Result};
use crate::source::SourceStats;

/// Paths of the three artifacts derived from a base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    graph: PathBuf,
    metadata: PathBuf,
    payloads: PathBuf,
}

impl ArtifactPaths {
    /// Derives artifact paths from `base`, which is itself the graph file.
    #[must_use]
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            graph: base.to_path_buf(),
            metadata: with_suffix(base, ".meta.json"),
            payloads: with_suffix(base, ".payloads"),
        }
    }

    /// Path of one artifact.
    #[must_use]
    pub fn path(&self, artifact: Artifact) -> &Path {
        match artifact {
            Artifact::Graph => &self.graph,
            Artifact::Metadata => &self.metadata,
            Artifact::Payloads => &self.payloads,
        }
    }

    /// All artifact paths, graph first.
    pub fn iter(&self) -> impl Iterator<Item = (Artifact, &Path)> {
        [Artifact::Graph, Artifact::Metadata, Artifact::Payloads]
            .into_iter()
            .map(|artifact| (artifact, self.path(artifact)))
    }

    /// Returns `true` if the graph artifact exists.
    #[must_use]
    pub fn graph_exists(&self) -> bool {
        self.graph.exists()
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes one artifact, creating parent directories as needed.
pub(crate) fn write_artifact(
    paths: &ArtifactPaths,
    artifact: Artifact,
    bytes: &[u8],
) -> Result<()> {
    let path = paths.path(artifact);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| IndexError::persistence(artifact, parent, e))?;
    }

    fs::write(path, bytes).map_err(|e| IndexError::persistence(artifact, path, e))
}

/// Reads one artifact. A missing file is `Ok(None)`.
pub(crate) fn read_artifact(paths: &ArtifactPaths, artifact: Artifact) -> Result<Option<Vec<u8>>> {
    let path = paths.path(artifact);
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(IndexError::persistence(artifact, path, e)),
    }
}

/// Deletes all artifacts. Files that do not exist are ignored.
pub(crate) fn remove_artifacts(paths: &ArtifactPaths) -> Result<()> {
    for (artifact, path) in paths.iter() {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(IndexError::persistence(artifact, path, e)),
        }
    }
    Ok(())
}

/// Checksum recorded in metadata for the graph and payload artifacts.
pub(crate) fn checksum(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

/// Reads the metadata artifact only. `Ok(None)` if it does not exist or was
/// written by another format version.
///
/// # Errors
/// Returns an error if the file exists but cannot be read or parsed.
pub fn read_metadata(base: impl AsRef<Path>) -> Result<Option<IndexMetadata>> {
    Ok(match read_stored_metadata(base)? {
        Some(StoredMetadata::Current(metadata)) => Some(metadata),
        Some(StoredMetadata::OtherVersion(_)) | None => None,
    })
}

pub(crate) fn read_stored_metadata(base: impl AsRef<Path>) -> Result<Option<StoredMetadata>> {
    let paths = ArtifactPaths::new(base);
    read_artifact(&paths, Artifact::Metadata)?
        .map(|bytes| StoredMetadata::from_json(&bytes))
        .transpose()
}

/// Decides whether the snapshot at `base` still matches the store.
///
/// Only the metadata file is read. A snapshot without a graph or without
/// metadata is [`Staleness::Missing`]; one written by another format version
/// is stale.
///
/// # Errors
/// Returns an error if the metadata file exists but cannot be read or parsed.
pub fn check_staleness(base: impl AsRef<Path>, current: &SourceStats) -> Result<Staleness> {
    let paths = ArtifactPaths::new(base.as_ref());
    if !paths.graph_exists() {
        return Ok(Staleness::Missing);
    }

    match read_stored_metadata(base)? {
        Some(metadata) => Ok(metadata.compare(current)),
        None => Ok(Staleness::Missing),
    }
}
