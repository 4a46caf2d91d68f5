//! Error types for the similarity index crate.

use std::path::PathBuf;
use thiserror::Error;

/// One of the three companion files written for a persisted index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    /// Binary export of the HNSW graph.
    Graph,
    /// JSON descriptor used for staleness checks.
    Metadata,
    /// Archived payload records.
    Payloads,
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Graph => "graph",
            Self::Metadata => "metadata",
            Self::Payloads => "payloads",
        })
    }
}

/// Errors that can occur in similarity index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Search was attempted before any graph was built or loaded.
    #[error("similarity index is not ready: no graph has been built or loaded")]
    NotReady,

    /// Dimension mismatch between an embedding and the index.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the index was configured with.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// Reading or writing one of the on-disk artifacts failed.
    #[error("persistence error on {artifact} artifact at {path}: {source}")]
    Persistence {
        /// Which artifact failed.
        artifact: Artifact,
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Encoding, decoding or verifying an artifact failed.
    #[error("serialization error on {artifact} artifact: {message}")]
    Serialization {
        /// Which artifact failed.
        artifact: Artifact,
        /// Description of the failure.
        message: String,
    },

    /// The authoritative store could not be read or written.
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl IndexError {
    pub(crate) fn persistence(
        artifact: Artifact,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Persistence {
            artifact,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(artifact: Artifact, message: impl std::fmt::Display) -> Self {
        Self::Serialization {
            artifact,
            message: message.to_string(),
        }
    }
}

/// Result type alias for similarity index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
