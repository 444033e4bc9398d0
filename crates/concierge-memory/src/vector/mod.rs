//! Similarity-search projection of the knowledge catalog.
//!
//! The index mirrors the catalog: each [`VectorEntry`] carries the entry's
//! embedding plus the display fields needed to render a hit. Catalog writes
//! are projected one entry at a time with [`VectorIndex::upsert`] and
//! [`VectorIndex::delete`]; [`VectorIndex::replace_all`] rebuilds from
//! scratch.
//!
//! Ties in score are broken by the order entries were first indexed.

mod memory;
mod sqlite;

use std::sync::Arc;

use crate::error::Result;
use crate::types::{EntryId, VectorEntry, VectorMatch};

pub use memory::InMemoryVectorIndex;
pub use sqlite::{SqliteVectorIndex, init_vector_extension};

/// Nearest-neighbour index over knowledge entry embeddings.
pub trait VectorIndex: Send + Sync {
    /// Insert or replace one entry. The entry keeps its original position
    /// for tie-breaking when it already exists.
    fn upsert(&self, entry: VectorEntry) -> Result<()>;

    /// Remove one entry. Returns `true` if it was present.
    fn delete(&self, id: EntryId) -> Result<bool>;

    /// Up to `k` closest entries, best first.
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>>;

    /// Fetch one entry.
    fn get(&self, id: EntryId) -> Result<Option<VectorEntry>>;

    /// Number of indexed entries.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Atomically swap the whole index for `entries`.
    fn replace_all(&self, entries: Vec<VectorEntry>) -> Result<()>;

    /// Dimensionality every stored vector must have.
    fn dimensions(&self) -> usize;

    /// Implementation name for logs.
    fn name(&self) -> &str;
}

/// A vector index shared across tasks.
pub type SharedVectorIndex = Arc<dyn VectorIndex>;

/// Rank candidates by score, then by insertion order, keeping the top `k`.
pub(crate) fn rank(mut scored: Vec<(VectorMatch, u64)>, k: usize) -> Vec<VectorMatch> {
    scored.sort_by(|(a, seq_a), (b, seq_b)| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| seq_a.cmp(seq_b))
    });
    scored.into_iter().take(k).map(|(m, _)| m).collect()
}
