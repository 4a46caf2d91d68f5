#![no_std]
//! # snapvault
//!
//! Façade crate for the similarity side of a personal photo library. Pull this crate into the
//! server binary to find look-alike faces and visually similar photos without scanning every
//! embedding in the database.
//!
//! ## What's inside?
//!
//! - [`FaceIndex`](similarity::FaceIndex) over 512-dimensional face embeddings keyed by face row
//!   id, carrying detection geometry and marker/subject linkage.
//! - [`ImageIndex`](similarity::ImageIndex) over whole-image embeddings keyed by photo uid.
//! - Three-file persistence with a metadata-only staleness check, so a restart can skip the
//!   rebuild when nothing changed.
//! - [`ManagedIndex`](similarity::ManagedIndex) and [`IndexRegistry`](similarity::IndexRegistry)
//!   to wire the indexes to the authoritative store.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use snapvault::similarity::{
//!     FaceRecord, IndexCapability, IndexConfig, ManagedIndex, MemorySource, WarmStart,
//! };
//!
//! fn start(rows: Vec<FaceRecord>) -> snapvault::similarity::Result<()> {
//!     let config = IndexConfig::builder()
//!         .face_index_path("/var/lib/snapvault/faces.hnsw")
//!         .build();
//!     let faces = ManagedIndex::faces(&config, Arc::new(MemorySource::with_rows(rows)));
//!
//!     match faces.warm_start()? {
//!         WarmStart::Loaded { count } => eprintln!("loaded {count} faces"),
//!         WarmStart::Rebuilt { count, reason } => eprintln!("rebuilt {count} faces: {reason:?}"),
//!         WarmStart::Disabled => {}
//!     }
//!     eprintln!("{} faces indexed", faces.count());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`similarity::index`] - the generic index plus face and image specializations.
//! - [`similarity::persistence`] - artifact layout, metadata, and staleness.
//! - [`similarity::service`] - warm start, single-row sync, and the registry.

#[cfg(feature = "similarity")]
pub use snapvault_similarity as similarity;

#[cfg(feature = "similarity")]
pub use snapvault_similarity::{FaceIndex, ImageIndex, IndexConfig, IndexError, Neighbor};
