//! Warm start against an in-memory store: rebuild on first boot, load on the
//! second, rebuild again once the store moved on.
//!
//! Run with `RUST_LOG=debug` to see the index lifecycle logs.

use std::sync::Arc;

use snapvault_similarity::{
    FaceRecord, IdentityLink, IndexCapability, IndexConfig, ManagedIndex, MemorySource, WarmStart,
};
use tracing_subscriber::EnvFilter;

const DIMENSION: usize = 512;

/// A deterministic pseudo-embedding: mostly `axis`, with a little of `seed` mixed in.
fn embedding(axis: usize, seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..DIMENSION)
        .map(|i| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let noise = (state % 1000) as f32 / 50_000.0;
            if i == axis { 1.0 + noise } else { noise }
        })
        .collect()
}

fn describe(outcome: &WarmStart) -> String {
    match outcome {
        WarmStart::Disabled => "disabled".to_string(),
        WarmStart::Loaded { count } => format!("loaded {count} faces from disk"),
        WarmStart::Rebuilt { count, reason } => {
            format!("rebuilt {count} faces from the store ({reason:?})")
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let dir = tempfile::tempdir()?;
    let config = IndexConfig::builder()
        .face_index_path(dir.path().join("faces.hnsw"))
        .seed(7)
        .build();

    // Three people, four photos each.
    let rows = (0..12).map(|id| {
        FaceRecord::new(id, format!("photo{id:02}"), embedding(id as usize % 3, id as u64))
    });
    let store = Arc::new(MemorySource::with_rows(rows));

    let first = ManagedIndex::faces(&config, Arc::clone(&store));
    println!("first boot: {}", describe(&first.warm_start()?));

    first.assign_identity(0, IdentityLink::new("mk-alice", "alice").with_subject_name("Alice"))?;
    // Identity patches do not move the staleness counters, so persist them explicitly.
    first.save()?;
    let similar = first.index().neighbors_of(&0, 4, 0.2)?;
    println!("faces resembling face 0:");
    for hit in &similar {
        println!("  face {:>2}  distance {:.4}", hit.key, hit.distance);
    }

    let second = ManagedIndex::faces(&config, Arc::clone(&store));
    println!("second boot: {}", describe(&second.warm_start()?));

    store.upsert(FaceRecord::new(12, "photo12", embedding(1, 99)));
    let third = ManagedIndex::faces(&config, Arc::clone(&store));
    println!("after a new detection: {}", describe(&third.warm_start()?));
    println!("{} faces indexed", third.count());

    Ok(())
}
