//! Domain services.
//!
//! This module contains the services that orchestrate Concierge's
//! conversations, knowledge catalog and session directory.

pub mod chat;
pub mod context;
pub mod knowledge;
pub mod locks;
pub mod retrieval;
pub mod sessions;
pub mod summary;
pub mod turn;

use std::sync::Arc;
use std::time::Duration;

use concierge_config::{ConciergeConfig, DEFAULT_FALLBACK_MESSAGE};
use concierge_llm::{SharedBackend, SharedEmbedder};
use concierge_memory::{
    KnowledgeStore, SessionIndex, SessionStore, SharedVectorIndex, SqliteStore, SummaryStore,
};
use concierge_session::CacheConfig;
use tracing::info;

use crate::error::Result;
use context::ContextConfig;
use retrieval::SearchMode;

/// Model name sent when none is configured; providers substitute their own.
pub const DEFAULT_MODEL: &str = "default";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Sampling parameters for generation calls.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    /// Deadline for one generation call.
    pub timeout: Duration,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            top_p: 1.0,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Configuration for domain services.
#[derive(Debug, Clone)]
pub struct DomainConfig {
    pub generation: GenerationParams,
    pub context: ContextConfig,
    /// Returned in place of a reply when generation fails.
    pub fallback_message: String,
    /// Prior turns included in each prompt.
    pub history_window: usize,
    /// Longest accepted user message, in characters.
    pub max_message_chars: usize,
    /// Turns between summaries; 0 disables summaries.
    pub summary_interval: usize,
    /// Idle days before a session is purged.
    pub inactive_days: u32,
    pub cache_ttl: Duration,
    pub cache_max_sessions: usize,
    /// Turns cached per session.
    pub cache_tail_len: usize,
    pub retrieval_enabled: bool,
    pub retrieval_mode: SearchMode,
    /// Knowledge entries per prompt.
    pub retrieval_limit: usize,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            generation: GenerationParams::default(),
            context: ContextConfig::default(),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            history_window: 10,
            max_message_chars: 2000,
            summary_interval: 20,
            inactive_days: 30,
            cache_ttl: Duration::from_secs(3600),
            cache_max_sessions: 10_000,
            cache_tail_len: 50,
            retrieval_enabled: true,
            retrieval_mode: SearchMode::Hybrid,
            retrieval_limit: 3,
        }
    }
}

impl DomainConfig {
    /// Build from the loaded configuration file.
    ///
    /// Fails if `retrieval.mode` is not a known search mode.
    pub fn from_config(config: &ConciergeConfig) -> Result<Self> {
        let llm = config.llm_config();
        let session = config.session_config();
        let retrieval = config.retrieval_config();
        let chat = config.chat_config();

        Ok(Self {
            generation: GenerationParams {
                model: llm.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                temperature: llm.temperature,
                max_tokens: llm.max_tokens,
                top_p: llm.top_p,
                timeout: Duration::from_secs(llm.timeout_secs),
            },
            context: ContextConfig::from(&chat),
            fallback_message: chat.fallback_message.clone(),
            history_window: session.history_window,
            max_message_chars: session.max_message_chars,
            summary_interval: session.summary_interval,
            inactive_days: session.inactive_days,
            cache_ttl: Duration::from_secs(session.cache_ttl_secs),
            cache_max_sessions: session.cache_max_sessions,
            cache_tail_len: session.cache_tail_len,
            retrieval_enabled: retrieval.enabled,
            retrieval_mode: retrieval.mode.parse()?,
            retrieval_limit: retrieval.limit,
        })
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_summary_interval(mut self, interval: usize) -> Self {
        self.summary_interval = interval;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation.timeout = timeout;
        self
    }

    pub fn with_retrieval(mut self, mode: SearchMode, limit: usize) -> Self {
        self.retrieval_mode = mode;
        self.retrieval_limit = limit;
        self
    }

    fn cache_config(&self) -> CacheConfig {
        CacheConfig::default()
            .with_ttl(self.cache_ttl)
            .with_max_sessions(self.cache_max_sessions)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

/// The durable stores behind the services.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub index: Arc<dyn SessionIndex>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub summaries: Arc<dyn SummaryStore>,
}

impl Stores {
    /// Use one SQLite database for everything.
    pub fn sqlite(store: Arc<SqliteStore>) -> Self {
        Self {
            sessions: store.clone(),
            index: store.clone(),
            knowledge: store.clone(),
            summaries: store,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Facade
// ─────────────────────────────────────────────────────────────────────────────

/// Domain services facade.
///
/// The main entry point for the CLI and any other front end.
#[derive(Clone)]
pub struct DomainServices {
    chat: chat::ChatService,
    sessions: sessions::SessionService,
    knowledge: knowledge::KnowledgeService,
    retrieval: retrieval::RetrievalEngine,
    config: Arc<DomainConfig>,
}

impl DomainServices {
    /// Wire the services together.
    ///
    /// Vector search is enabled only when both `embedder` and `vectors` are
    /// given.
    pub fn new(
        backend: SharedBackend,
        embedder: Option<SharedEmbedder>,
        stores: Stores,
        vectors: Option<SharedVectorIndex>,
        config: DomainConfig,
    ) -> Self {
        let config = Arc::new(config);

        let mut retrieval = retrieval::RetrievalEngine::new(stores.knowledge.clone());
        let mut knowledge = knowledge::KnowledgeService::new(stores.knowledge.clone());
        if let (Some(embedder), Some(index)) = (embedder, vectors) {
            retrieval = retrieval.with_vectors(embedder.clone(), index.clone());
            knowledge = knowledge.with_vectors(embedder, index);
        }

        info!(
            backend = backend.name(),
            vector_search = retrieval.vector_available(),
            history_window = config.history_window,
            "Initializing domain services"
        );

        let sessions = sessions::SessionService::new(
            stores.clone(),
            config.cache_config(),
            config.cache_tail_len,
        );
        let summarizer = summary::Summarizer::new(
            backend.clone(),
            stores.sessions.clone(),
            stores.summaries.clone(),
            config.generation.clone(),
            config.summary_interval,
        );
        let chat = chat::ChatService::new(
            backend,
            sessions.clone(),
            retrieval.clone(),
            summarizer,
            config.clone(),
        );

        Self {
            chat,
            sessions,
            knowledge,
            retrieval,
            config,
        }
    }

    /// Get the chat service.
    pub fn chat(&self) -> &chat::ChatService {
        &self.chat
    }

    /// Get the session service.
    pub fn sessions(&self) -> &sessions::SessionService {
        &self.sessions
    }

    /// Get the knowledge service.
    pub fn knowledge(&self) -> &knowledge::KnowledgeService {
        &self.knowledge
    }

    /// Get the retrieval engine.
    pub fn retrieval(&self) -> &retrieval::RetrievalEngine {
        &self.retrieval
    }

    pub fn config(&self) -> &DomainConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_llm::MockBackend;

    fn create_test_services() -> DomainServices {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        DomainServices::new(
            Arc::new(MockBackend::with_text("Test response")),
            None,
            Stores::sqlite(store),
            None,
            DomainConfig::default(),
        )
    }

    #[test]
    fn test_domain_services_creation() {
        let services = create_test_services();
        assert!(!services.retrieval().vector_available());
        assert!(!services.knowledge().is_indexed());
        assert_eq!(services.config().history_window, 10);
    }

    #[test]
    fn test_config_from_file() {
        let config = ConciergeConfig::from_toml(
            r#"
[llm]
provider = "mock"
model = "mock-large"
timeout_secs = 5

[session]
history_window = 4
summary_interval = 0

[retrieval]
mode = "Keyword"
limit = 2

[chat]
fallback_message = "Try again."
"#,
        )
        .unwrap();

        let domain = DomainConfig::from_config(&config).unwrap();
        assert_eq!(domain.generation.model, "mock-large");
        assert_eq!(domain.generation.timeout, Duration::from_secs(5));
        assert_eq!(domain.history_window, 4);
        assert_eq!(domain.summary_interval, 0);
        assert_eq!(domain.retrieval_mode, SearchMode::Keyword);
        assert_eq!(domain.retrieval_limit, 2);
        assert_eq!(domain.fallback_message, "Try again.");
    }

    #[test]
    fn test_config_rejects_unknown_mode() {
        let config = ConciergeConfig::from_toml("[retrieval]\nmode = \"fuzzy\"\n").unwrap();
        let err = DomainConfig::from_config(&config).unwrap_err();
        assert!(matches!(err, crate::DomainError::Validation(_)));
    }
}
