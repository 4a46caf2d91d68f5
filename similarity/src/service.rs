//! Wiring between an index, its authoritative store and the disk.
//!
//! [`ManagedIndex`] owns the policy: when to trust a snapshot, when to rebuild,
//! how single-row store changes flow into the index. [`IndexCapability`] is the
//! narrow interface the rest of the application uses to trigger a rebuild or a
//! save without knowing which index it is talking to.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::{FaceIndex, ImageIndex, LoadOutcome, SaveOutcome, SimilarityIndex};
use crate::persistence::{Staleness, check_staleness};
use crate::records::{FaceRecord, IdentityLink, ImageEmbeddingRecord};
use crate::source::{IdentityWriter, RecordSource};
use crate::types::IndexRecord;

/// Operations every managed index exposes to outer code.
pub trait IndexCapability: Send + Sync {
    /// Short name used in logs, e.g. `"face"`.
    fn name(&self) -> &str;

    /// Reloads the index from the authoritative store.
    ///
    /// # Errors
    /// Returns [`IndexError::Store`] if the store is unreachable.
    fn rebuild(&self) -> Result<usize>;

    /// Number of indexed items.
    fn count(&self) -> usize;

    /// Whether the index is active at all.
    fn is_enabled(&self) -> bool;

    /// Persists the index. Returns `None` when no path is configured.
    ///
    /// # Errors
    /// Returns an error naming the artifact that failed.
    fn save(&self) -> Result<Option<SaveOutcome>>;
}

/// How [`ManagedIndex::warm_start`] brought the index up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmStart {
    /// The index is disabled; nothing was done.
    Disabled,
    /// A fresh snapshot was loaded from disk.
    Loaded {
        /// Items loaded.
        count: usize,
    },
    /// The index was rebuilt from the store.
    Rebuilt {
        /// Items indexed.
        count: usize,
        /// Why the snapshot was not used.
        reason: RebuildReason,
    },
}

/// Why a warm start fell back to a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    /// No persistence path is configured.
    NoPath,
    /// No snapshot exists at the configured path.
    Missing,
    /// The snapshot no longer matches the store.
    Stale(String),
    /// The snapshot was written for another format, kind or dimension.
    Incompatible(String),
    /// The snapshot could not be read or failed verification.
    Unreadable(String),
}

/// Result of mirroring one store row with [`ManagedIndex::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The row was inserted or replaced.
    Indexed,
    /// The row has no embedding yet.
    Skipped,
    /// The row is gone from the store and was soft-deleted.
    Removed,
    /// The row is gone from the store and was not indexed.
    Absent,
}

/// An index bound to its store and on-disk location.
pub struct ManagedIndex<R: IndexRecord, S> {
    index: Arc<SimilarityIndex<R>>,
    source: Arc<S>,
    path: Option<PathBuf>,
    enabled: bool,
    auto_save: bool,
}

impl<R: IndexRecord, S> std::fmt::Debug for ManagedIndex<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedIndex")
            .field("index", &self.index)
            .field("path", &self.path)
            .field("enabled", &self.enabled)
            .field("auto_save", &self.auto_save)
            .finish_non_exhaustive()
    }
}

impl<S: RecordSource<FaceRecord>> ManagedIndex<FaceRecord, S> {
    /// Face index configured from `config`.
    #[must_use]
    pub fn faces(config: &IndexConfig, source: Arc<S>) -> Self {
        Self::new(FaceIndex::for_faces(config), source)
            .with_path(config.face_index_path.clone())
            .enabled(config.faces_enabled)
            .auto_save(config.auto_save)
    }
}

impl<S: RecordSource<ImageEmbeddingRecord>> ManagedIndex<ImageEmbeddingRecord, S> {
    /// Image index configured from `config`.
    #[must_use]
    pub fn images(config: &IndexConfig, source: Arc<S>) -> Self {
        Self::new(ImageIndex::for_images(config), source)
            .with_path(config.image_index_path.clone())
            .enabled(config.images_enabled)
            .auto_save(config.auto_save)
    }
}

impl<R: IndexRecord, S: RecordSource<R>> ManagedIndex<R, S> {
    /// Binds `index` to `source`, enabled, without persistence.
    #[must_use]
    pub fn new(index: SimilarityIndex<R>, source: Arc<S>) -> Self {
        Self {
            index: Arc::new(index),
            source,
            path: None,
            enabled: true,
            auto_save: false,
        }
    }

    /// Sets the base path for persistence.
    #[must_use]
    pub fn with_path(mut self, path: Option<PathBuf>) -> Self {
        self.path = path;
        self
    }

    /// Enables or disables the index.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Saves after every rebuild when enabled.
    #[must_use]
    pub fn auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    /// Shared handle to the index, for search.
    #[must_use]
    pub const fn index(&self) -> &Arc<SimilarityIndex<R>> {
        &self.index
    }

    /// Configured base path.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Compares the snapshot on disk with the store. `None` without a path.
    ///
    /// # Errors
    /// Returns an error if the store or the metadata file cannot be read.
    pub fn staleness(&self) -> Result<Option<Staleness>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let stats = self.source.stats().map_err(IndexError::Store)?;
        check_staleness(path, &stats).map(Some)
    }

    /// Brings the index up at process start: loads the snapshot if it still
    /// matches the store, otherwise rebuilds.
    ///
    /// An unreadable snapshot is logged and replaced by a rebuild.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    pub fn warm_start(&self) -> Result<WarmStart> {
        if !self.enabled {
            return Ok(WarmStart::Disabled);
        }

        let reason = match self.try_load() {
            Ok(Ok(count)) => return Ok(WarmStart::Loaded { count }),
            Ok(Err(reason)) => reason,
            Err(IndexError::Store(error)) => return Err(IndexError::Store(error)),
            Err(error) => {
                warn!(kind = R::KIND, %error, "persisted index is unreadable");
                RebuildReason::Unreadable(error.to_string())
            }
        };

        info!(kind = R::KIND, ?reason, "rebuilding similarity index");
        let count = self.rebuild_from_store()?;
        Ok(WarmStart::Rebuilt { count, reason })
    }

    /// Loads the snapshot if it is fresh, else says why it was not used.
    fn try_load(&self) -> Result<std::result::Result<usize, RebuildReason>> {
        let Some(path) = &self.path else {
            return Ok(Err(RebuildReason::NoPath));
        };
        let stats = self.source.stats().map_err(IndexError::Store)?;
        let reason = match check_staleness(path, &stats)? {
            Staleness::Fresh => match self.index.load(path)? {
                LoadOutcome::Loaded { count } => return Ok(Ok(count)),
                LoadOutcome::Missing => RebuildReason::Missing,
                LoadOutcome::Incompatible(why) => RebuildReason::Incompatible(why),
            },
            Staleness::Stale(why) => RebuildReason::Stale(why.to_string()),
            Staleness::Missing => RebuildReason::Missing,
        };
        Ok(Err(reason))
    }

    fn rebuild_from_store(&self) -> Result<usize> {
        let rows = self.source.snapshot().map_err(IndexError::Store)?;
        let count = self.index.build(rows)?;

        if self.auto_save {
            if let Some(path) = &self.path {
                // The in-memory index is valid either way.
                if let Err(error) = self.index.save(path) {
                    warn!(kind = R::KIND, %error, "failed to save rebuilt index");
                }
            }
        }
        Ok(count)
    }

    /// Mirrors one store row into the index: inserts it if present, soft
    /// deletes it if gone.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable or the embedding has the
    /// wrong dimension.
    pub fn sync(&self, key: &R::Key) -> Result<SyncOutcome> {
        let row = self.source.fetch(key).map_err(IndexError::Store)?;
        match row {
            Some(row) => {
                if self.index.add(row)? {
                    Ok(SyncOutcome::Indexed)
                } else {
                    Ok(SyncOutcome::Skipped)
                }
            }
            None if self.index.soft_delete(key) => Ok(SyncOutcome::Removed),
            None => Ok(SyncOutcome::Absent),
        }
    }
}

impl<S: RecordSource<FaceRecord> + IdentityWriter> ManagedIndex<FaceRecord, S> {
    /// Links a face to a marker/subject in the store, then in the index.
    ///
    /// # Returns
    /// `false` if the store has no such face row.
    ///
    /// # Errors
    /// Returns [`IndexError::Store`] if the store update fails. The index is
    /// not touched in that case.
    pub fn assign_identity(&self, face_id: i64, link: IdentityLink) -> Result<bool> {
        if !self
            .source
            .update_identity(face_id, &link)
            .map_err(IndexError::Store)?
        {
            return Ok(false);
        }
        self.index.patch_identity(face_id, link);
        Ok(true)
    }
}

impl<R: IndexRecord, S: RecordSource<R>> IndexCapability for ManagedIndex<R, S> {
    fn name(&self) -> &str {
        R::KIND
    }

    fn rebuild(&self) -> Result<usize> {
        if !self.enabled {
            return Ok(0);
        }
        let count = self.rebuild_from_store()?;
        info!(kind = R::KIND, count, "rebuilt similarity index from store");
        Ok(count)
    }

    fn count(&self) -> usize {
        self.index.len()
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn save(&self) -> Result<Option<SaveOutcome>> {
        match &self.path {
            Some(path) if self.enabled => self.index.save(path).map(Some),
            _ => Ok(None),
        }
    }
}

/// The set of managed indexes, handed to whoever needs to trigger rebuilds.
#[derive(Default)]
pub struct IndexRegistry {
    entries: Vec<Arc<dyn IndexCapability>>,
}

impl std::fmt::Debug for IndexRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| entry.name()))
            .finish()
    }
}

impl IndexRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an index.
    pub fn register(&mut self, index: Arc<dyn IndexCapability>) {
        self.entries.push(index);
    }

    /// Looks up an index by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn IndexCapability>> {
        self.entries.iter().find(|entry| entry.name() == name)
    }

    /// Rebuilds every enabled index, stopping at the first failure.
    ///
    /// # Errors
    /// Returns the first rebuild error.
    pub fn rebuild_all(&self) -> Result<usize> {
        let mut total = 0;
        for entry in self.entries.iter().filter(|entry| entry.is_enabled()) {
            total += entry.rebuild()?;
        }
        Ok(total)
    }

    /// Saves every index. A failing index does not stop the others.
    ///
    /// # Errors
    /// Returns the first save error after all indexes were attempted.
    pub fn save_all(&self) -> Result<()> {
        let mut first_error = None;
        for entry in &self.entries {
            if let Err(error) = entry.save() {
                warn!(index = entry.name(), %error, "failed to save similarity index");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Item count per index name.
    #[must_use]
    pub fn counts(&self) -> Vec<(String, usize)> {
        self.entries
            .iter()
            .map(|entry| (entry.name().to_string(), entry.count()))
            .collect()
    }
}
