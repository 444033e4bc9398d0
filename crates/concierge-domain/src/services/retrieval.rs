//! Knowledge retrieval.
//!
//! Three strategies over the knowledge catalog:
//!
//! - **vector**: embed the query and ask the [`VectorIndex`] for the nearest
//!   entries.
//! - **keyword**: score every entry by the distinct query tokens it contains
//!   (title 3, tag 2, body 1).
//! - **hybrid**: vector first; if the embedder is missing, fails, or finds
//!   nothing, the keyword result is returned instead. Scores from the two
//!   strategies are never blended.
//!
//! [`VectorIndex`]: concierge_memory::VectorIndex

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use concierge_llm::{LlmError, SharedEmbedder};
use concierge_memory::{KnowledgeEntry, KnowledgeStore, MemoryError, SharedVectorIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{DomainError, Result};

/// Score for a token found in an entry's title.
pub const TITLE_WEIGHT: u32 = 3;
/// Score for a token found in one of an entry's tags.
pub const TAG_WEIGHT: u32 = 2;
/// Score for a token found in an entry's body.
pub const BODY_WEIGHT: u32 = 1;

/// Tokens shorter than this (in characters) are ignored.
const MIN_TOKEN_CHARS: usize = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Search Mode
// ─────────────────────────────────────────────────────────────────────────────

/// Retrieval strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Keyword,
    #[default]
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Vector => "vector",
            SearchMode::Keyword => "keyword",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" => Ok(SearchMode::Vector),
            "keyword" => Ok(SearchMode::Keyword),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(DomainError::validation(format!(
                "unknown search mode '{}' (expected vector, keyword, or hybrid)",
                other
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors and Results
// ─────────────────────────────────────────────────────────────────────────────

/// Failure inside a search backend.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// No embedder or vector index is configured.
    #[error("vector search is unavailable: no embedding capability configured")]
    Unavailable,

    /// The embedder failed.
    #[error("embedding failed: {0}")]
    Embedding(#[from] LlmError),

    /// The vector index failed.
    #[error("vector index failed: {0}")]
    Index(#[source] MemoryError),

    /// The knowledge catalog failed.
    #[error("knowledge store failed: {0}")]
    Store(#[source] MemoryError),
}

/// A knowledge entry with the score that ranked it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub entry: KnowledgeEntry,
    /// Similarity for vector hits, summed token weight for keyword hits.
    pub score: f32,
    /// Strategy that produced this hit.
    pub matched_by: SearchMode,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tokenizer
// ─────────────────────────────────────────────────────────────────────────────

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // Hiragana, Katakana
        | 0x3400..=0x4DBF    // CJK Extension A
        | 0x4E00..=0x9FFF    // CJK Unified Ideographs
        | 0xF900..=0xFAFF    // CJK Compatibility Ideographs
        | 0x20000..=0x2A6DF  // CJK Extension B
    )
}

/// Split a query into distinct lowercase search tokens.
///
/// Words come from Unicode word segmentation. Scripts written without
/// spaces segment into single characters, so each run of CJK characters
/// also contributes its overlapping two-character windows.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();
    let mut push = |token: String| {
        if token.chars().count() >= MIN_TOKEN_CHARS && seen.insert(token.clone()) {
            tokens.push(token);
        }
    };

    for word in lowered.unicode_words() {
        push(word.to_string());
    }

    let mut run: Vec<char> = Vec::new();
    for c in lowered.chars().chain(std::iter::once(' ')) {
        if is_cjk(c) {
            run.push(c);
            continue;
        }
        for pair in run.windows(2) {
            push(pair.iter().collect());
        }
        run.clear();
    }

    tokens
}

/// Keyword relevance of one entry for a set of distinct tokens.
///
/// Each token counts once, at the weight of the best field it appears in.
pub fn keyword_score(entry: &KnowledgeEntry, tokens: &[String]) -> u32 {
    let title = entry.title.to_lowercase();
    let body = entry.body.to_lowercase();
    let tags: Vec<String> = entry.tags.iter().map(|t| t.to_lowercase()).collect();

    tokens
        .iter()
        .map(|token| {
            if title.contains(token.as_str()) {
                TITLE_WEIGHT
            } else if tags.iter().any(|tag| tag.contains(token.as_str())) {
                TAG_WEIGHT
            } else if body.contains(token.as_str()) {
                BODY_WEIGHT
            } else {
                0
            }
        })
        .sum()
}

// ─────────────────────────────────────────────────────────────────────────────
// Retrieval Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Search orchestrator over the knowledge catalog and its vector projection.
///
/// The embedder and index are optional; without them only keyword search
/// works and hybrid search degrades to keyword.
#[derive(Clone)]
pub struct RetrievalEngine {
    knowledge: Arc<dyn KnowledgeStore>,
    index: Option<SharedVectorIndex>,
    embedder: Option<SharedEmbedder>,
}

impl RetrievalEngine {
    /// Create a keyword-only engine.
    pub fn new(knowledge: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            knowledge,
            index: None,
            embedder: None,
        }
    }

    /// Enable vector search.
    pub fn with_vectors(mut self, embedder: SharedEmbedder, index: SharedVectorIndex) -> Self {
        self.embedder = Some(embedder);
        self.index = Some(index);
        self
    }

    /// Whether vector search can run.
    pub fn vector_available(&self) -> bool {
        self.embedder.is_some() && self.index.is_some()
    }

    /// Search the catalog.
    ///
    /// `limit` must be at least 1. Vector and keyword modes surface their
    /// backend failures as [`DomainError::Retrieval`]; hybrid only fails
    /// when the keyword fallback itself fails.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        mode: SearchMode,
    ) -> Result<Vec<ScoredEntry>> {
        if limit == 0 {
            return Err(DomainError::validation("search limit must be at least 1"));
        }
        debug!(mode = ?mode, limit, query_len = query.len(), "Searching knowledge");

        let hits = match mode {
            SearchMode::Vector => self.vector_search(query, limit).await?,
            SearchMode::Keyword => self.keyword_search(query, limit)?,
            SearchMode::Hybrid => match self.vector_search(query, limit).await {
                Ok(hits) if !hits.is_empty() => hits,
                Ok(_) => {
                    debug!("Vector search found nothing, using keyword search");
                    self.keyword_search(query, limit)?
                }
                Err(RetrievalError::Unavailable) => {
                    debug!("Vector search unavailable, using keyword search");
                    self.keyword_search(query, limit)?
                }
                Err(e) => {
                    warn!(error = %e, "Vector search failed, using keyword search");
                    self.keyword_search(query, limit)?
                }
            },
        };

        debug!(mode = ?mode, hits = hits.len(), "Knowledge search complete");
        Ok(hits)
    }

    /// Nearest entries by embedding similarity.
    ///
    /// Index hits whose entry has since been deleted are skipped, and the
    /// index is asked for more candidates until `limit` live entries are
    /// found or it runs dry.
    pub async fn vector_search(
        &self,
        query: &str,
        limit: usize,
    ) -> std::result::Result<Vec<ScoredEntry>, RetrievalError> {
        let (Some(embedder), Some(index)) = (&self.embedder, &self.index) else {
            return Err(RetrievalError::Unavailable);
        };

        if limit == 0 {
            return Ok(Vec::new());
        }
        let vector = embedder.embed(query).await?;

        let mut fetch = limit.saturating_mul(2);
        loop {
            let matches = index.query(&vector, fetch).map_err(RetrievalError::Index)?;
            let exhausted = matches.len() < fetch;

            let mut hits = Vec::with_capacity(limit);
            for m in matches {
                if hits.len() == limit {
                    break;
                }
                match self.knowledge.get_entry(m.id).map_err(RetrievalError::Store)? {
                    Some(entry) => hits.push(ScoredEntry {
                        entry,
                        score: m.score,
                        matched_by: SearchMode::Vector,
                    }),
                    None => debug!(entry_id = %m.id, "Skipping stale vector hit"),
                }
            }

            if hits.len() == limit || exhausted {
                return Ok(hits);
            }
            fetch = fetch.saturating_mul(2);
        }
    }

    /// Entries ranked by keyword score, then most recently updated.
    pub fn keyword_search(
        &self,
        query: &str,
        limit: usize,
    ) -> std::result::Result<Vec<ScoredEntry>, RetrievalError> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.knowledge.all_entries().map_err(RetrievalError::Store)?;
        let mut scored: Vec<(u32, KnowledgeEntry)> = entries
            .into_iter()
            .filter_map(|entry| {
                let score = keyword_score(&entry, &tokens);
                (score > 0).then_some((score, entry))
            })
            .collect();

        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .cmp(score_a)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, entry)| ScoredEntry {
                entry,
                score: score as f32,
                matched_by: SearchMode::Keyword,
            })
            .collect())
    }
}
