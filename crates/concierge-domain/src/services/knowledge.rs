//! Knowledge catalog service.
//!
//! Wraps the [`KnowledgeStore`] and keeps the vector projection in step with
//! it, one entry at a time. A catalog write never waits on, or fails
//! because of, the vector side: embedding or index errors are logged and the
//! index catches up on the next [`KnowledgeService::resync`].
//!
//! Writes to one entry are serialized, and a vector is only stored if the
//! catalog still holds the text it was embedded from.

use std::sync::Arc;

use concierge_llm::SharedEmbedder;
use concierge_memory::validation::validate_draft;
use concierge_memory::{
    EntryId, KnowledgeDraft, KnowledgeEntry, KnowledgeStore, SharedVectorIndex, VectorEntry,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{DomainError, Result};
use crate::services::locks::SessionLocks;
use crate::services::retrieval::RetrievalError;

/// Entries embedded per batch during a resync.
const RESYNC_BATCH_SIZE: usize = 32;

/// Outcome of a full vector resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    /// Entries in the catalog.
    pub entries: usize,
    /// Entries now present in the index.
    pub indexed: usize,
}

impl std::fmt::Display for ResyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} entries indexed", self.indexed, self.entries)
    }
}

/// Domain service for knowledge CRUD.
#[derive(Clone)]
pub struct KnowledgeService {
    store: Arc<dyn KnowledgeStore>,
    index: Option<SharedVectorIndex>,
    embedder: Option<SharedEmbedder>,
    locks: SessionLocks,
}

impl KnowledgeService {
    /// Create a service without vector sync.
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            store,
            index: None,
            embedder: None,
            locks: SessionLocks::new(),
        }
    }

    /// Project writes into a vector index.
    pub fn with_vectors(mut self, embedder: SharedEmbedder, index: SharedVectorIndex) -> Self {
        self.embedder = Some(embedder);
        self.index = Some(index);
        self
    }

    /// Whether writes are projected into a vector index.
    pub fn is_indexed(&self) -> bool {
        self.embedder.is_some() && self.index.is_some()
    }

    /// Create an entry with a fresh id.
    pub async fn create(&self, draft: KnowledgeDraft) -> Result<KnowledgeEntry> {
        validate_draft(&draft)?;
        let entry = self.store.insert_entry(draft)?;
        info!(entry_id = %entry.id, title = %entry.title, "Knowledge entry created");
        let _guard = self.locks.acquire(&entry.id.to_string()).await;
        self.project(&entry).await;
        Ok(entry)
    }

    /// Create several entries. Every draft is validated before any is
    /// stored; each stored entry is then projected on its own.
    pub async fn create_many(&self, drafts: Vec<KnowledgeDraft>) -> Result<Vec<KnowledgeEntry>> {
        for (i, draft) in drafts.iter().enumerate() {
            validate_draft(draft)
                .map_err(|e| DomainError::Validation(format!("entry {}: {}", i + 1, e)))?;
        }

        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            created.push(self.create(draft).await?);
        }
        info!(count = created.len(), "Knowledge entries added in batch");
        Ok(created)
    }

    /// Get an entry.
    pub fn get(&self, id: EntryId) -> Result<KnowledgeEntry> {
        self.store
            .get_entry(id)?
            .ok_or_else(|| DomainError::NotFound(format!("knowledge entry {}", id)))
    }

    /// Replace an entry's fields, keeping its id.
    pub async fn update(&self, id: EntryId, draft: KnowledgeDraft) -> Result<KnowledgeEntry> {
        validate_draft(&draft)?;
        let _guard = self.locks.acquire(&id.to_string()).await;
        let entry = self.store.update_entry(id, draft)?;
        info!(entry_id = %entry.id, "Knowledge entry updated");
        self.project(&entry).await;
        Ok(entry)
    }

    /// Delete an entry. Returns `false` if it did not exist.
    pub async fn delete(&self, id: EntryId) -> Result<bool> {
        let _guard = self.locks.acquire(&id.to_string()).await;
        let existed = self.store.delete_entry(id)?;
        if existed {
            info!(entry_id = %id, "Knowledge entry deleted");
        }
        self.unproject(id);
        Ok(existed)
    }

    /// Page through entries, most recently updated first, optionally
    /// restricted to one category.
    pub fn list(
        &self,
        category: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<KnowledgeEntry>> {
        Ok(self.store.list_entries(category, limit, offset)?)
    }

    /// Distinct categories in use, sorted.
    pub fn categories(&self) -> Result<Vec<String>> {
        Ok(self.store.categories()?)
    }

    /// Number of entries.
    pub fn count(&self) -> Result<usize> {
        Ok(self.store.count_entries()?)
    }

    /// Rebuild the whole vector index from the catalog.
    ///
    /// Unlike single-entry sync, failures here are returned to the caller
    /// and the previous index is left in place.
    pub async fn resync(&self) -> Result<ResyncReport> {
        let (Some(embedder), Some(index)) = (&self.embedder, &self.index) else {
            return Err(RetrievalError::Unavailable.into());
        };

        let entries = self.store.all_entries()?;
        let mut projected = Vec::with_capacity(entries.len());

        for batch in entries.chunks(RESYNC_BATCH_SIZE) {
            let documents: Vec<String> = batch.iter().map(KnowledgeEntry::document).collect();
            let refs: Vec<&str> = documents.iter().map(String::as_str).collect();
            let vectors = embedder
                .embed_batch(&refs)
                .await
                .map_err(RetrievalError::Embedding)?;
            if vectors.len() != batch.len() {
                return Err(DomainError::Internal(format!(
                    "embedder returned {} vectors for {} documents",
                    vectors.len(),
                    batch.len()
                )));
            }
            projected.extend(
                batch
                    .iter()
                    .zip(vectors)
                    .map(|(entry, vector)| VectorEntry::from_entry(entry, vector)),
            );
            debug!(done = projected.len(), total = entries.len(), "Resync progress");
        }

        index
            .replace_all(projected)
            .map_err(RetrievalError::Index)?;
        let report = ResyncReport {
            entries: entries.len(),
            indexed: index.len().map_err(RetrievalError::Index)?,
        };
        info!(index = index.name(), report = %report, "Vector index resynced");
        Ok(report)
    }

    /// Insert the starter entries when the catalog is empty.
    ///
    /// Returns how many entries were created.
    pub async fn seed_defaults(&self) -> Result<usize> {
        if self.store.count_entries()? > 0 {
            debug!("Knowledge catalog not empty, skipping seed");
            return Ok(0);
        }
        let drafts = default_entries();
        let count = drafts.len();
        for draft in drafts {
            self.create(draft).await?;
        }
        info!(count, "Seeded default knowledge entries");
        Ok(count)
    }

    /// Regenerate one entry's vector. If the embedding cannot be produced
    /// the stale vector is dropped so search never serves outdated text.
    ///
    /// Callers hold the entry's lock.
    async fn project(&self, entry: &KnowledgeEntry) {
        let (Some(embedder), Some(index)) = (&self.embedder, &self.index) else {
            return;
        };

        let vector = match embedder.embed(&entry.document()).await {
            Ok(v) => v,
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "Embedding failed, dropping stale vector");
                self.unproject(entry.id);
                return;
            }
        };

        match self.store.get_entry(entry.id) {
            Ok(Some(current)) if same_content(&current, entry) => {}
            Ok(Some(_)) => {
                debug!(entry_id = %entry.id, "Entry changed while embedding, skipping upsert");
                return;
            }
            Ok(None) => {
                debug!(entry_id = %entry.id, "Entry deleted while embedding, skipping upsert");
                self.unproject(entry.id);
                return;
            }
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "Entry re-read failed, dropping stale vector");
                self.unproject(entry.id);
                return;
            }
        }

        match index.upsert(VectorEntry::from_entry(entry, vector)) {
            Ok(()) => debug!(entry_id = %entry.id, index = index.name(), "Vector entry synced"),
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "Vector upsert failed, dropping stale vector");
                self.unproject(entry.id);
            }
        }
    }

    fn unproject(&self, id: EntryId) {
        if let Some(index) = &self.index
            && let Err(e) = index.delete(id)
        {
            warn!(entry_id = %id, error = %e, "Vector delete failed");
        }
    }
}

fn same_content(a: &KnowledgeEntry, b: &KnowledgeEntry) -> bool {
    a.title == b.title && a.body == b.body && a.category == b.category && a.tags == b.tags
}

/// Starter entries for an empty catalog.
pub fn default_entries() -> Vec<KnowledgeDraft> {
    vec![
        KnowledgeDraft::new(
            "Welcome to the customer service assistant",
            "Welcome! I can help with product questions, technical support, and \
             after-sales service. Ask me anything at any time.",
        )
        .with_category("general")
        .with_tags(["welcome", "introduction", "help"]),
        KnowledgeDraft::new(
            "Product features",
            "Our product offers: 1. Conversational assistance with natural, fluent \
             dialogue; 2. A managed knowledge base with fast retrieval; 3. Multi-turn \
             conversations that keep context; 4. Personalized service tailored to \
             each customer.",
        )
        .with_category("product")
        .with_tags(["features", "introduction", "product"]),
        KnowledgeDraft::new(
            "Technical support",
            "If you run into a technical problem, please provide: 1. A detailed \
             description of the issue; 2. The steps that lead to it; 3. Any error \
             messages; 4. Your operating environment. Our technical team will \
             resolve it as quickly as possible.",
        )
        .with_category("support")
        .with_tags(["technical", "support", "troubleshooting"]),
    ]
}
