//! In-process vector index.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::types::{EntryId, VectorEntry, VectorMatch};
use crate::validation::validate_embedding;

use super::{VectorIndex, rank};

struct Slot {
    seq: u64,
    entry: Arc<VectorEntry>,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<EntryId, Slot>,
    next_seq: u64,
}

impl Inner {
    fn put(&mut self, entry: VectorEntry) {
        let entry = Arc::new(entry);
        match self.slots.get_mut(&entry.id) {
            Some(slot) => slot.entry = entry,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.slots.insert(entry.id, Slot { seq, entry });
            }
        }
    }
}

/// Vector index held entirely in memory, scored by cosine similarity.
///
/// Each entry is stored behind an `Arc` and replaced whole, so readers
/// never observe a half-updated entry.
pub struct InMemoryVectorIndex {
    dimensions: usize,
    inner: RwLock<Inner>,
}

impl InMemoryVectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl std::fmt::Debug for InMemoryVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorIndex")
            .field("dimensions", &self.dimensions)
            .field("len", &self.inner.read().slots.len())
            .finish()
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn upsert(&self, entry: VectorEntry) -> Result<()> {
        validate_embedding(&entry.vector, self.dimensions)?;
        let id = entry.id;
        self.inner.write().put(entry);
        debug!("Indexed vector for entry {}", id);
        Ok(())
    }

    fn delete(&self, id: EntryId) -> Result<bool> {
        Ok(self.inner.write().slots.remove(&id).is_some())
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        validate_embedding(vector, self.dimensions)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let inner = self.inner.read();
        let scored = inner
            .slots
            .values()
            .map(|slot| {
                let hit = VectorMatch {
                    id: slot.entry.id,
                    score: cosine(vector, &slot.entry.vector),
                };
                (hit, slot.seq)
            })
            .collect();

        Ok(rank(scored, k))
    }

    fn get(&self, id: EntryId) -> Result<Option<VectorEntry>> {
        Ok(self
            .inner
            .read()
            .slots
            .get(&id)
            .map(|slot| slot.entry.as_ref().clone()))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.inner.read().slots.len())
    }

    fn replace_all(&self, entries: Vec<VectorEntry>) -> Result<()> {
        for entry in &entries {
            validate_embedding(&entry.vector, self.dimensions)?;
        }

        let mut fresh = Inner::default();
        let count = entries.len();
        for entry in entries {
            fresh.put(entry);
        }

        *self.inner.write() = fresh;
        debug!("Rebuilt in-memory vector index with {} entries", count);
        Ok(())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "memory"
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
