//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [llm]          # generation provider
//! [embedding]    # optional embedding provider
//! [session]      # cache, history window, summaries
//! [retrieval]    # knowledge search
//! [chat]         # prompts and domain hints
//! [storage]      # data directory
//! [logging]      # log level and file output
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged. Use the `*_config()` accessors to
/// read a section with defaults filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConciergeConfig {
    pub llm: Option<LlmConfig>,
    pub embedding: Option<EmbeddingConfig>,
    pub session: Option<SessionConfig>,
    pub retrieval: Option<RetrievalConfig>,
    pub chat: Option<ChatConfig>,
    pub storage: Option<StorageConfig>,
    pub logging: Option<LoggingConfig>,
}

impl ConciergeConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// A section present in `other` replaces the whole section here.
    pub fn merge(&mut self, other: ConciergeConfig) {
        if other.llm.is_some() {
            self.llm = other.llm;
        }
        if other.embedding.is_some() {
            self.embedding = other.embedding;
        }
        if other.session.is_some() {
            self.session = other.session;
        }
        if other.retrieval.is_some() {
            self.retrieval = other.retrieval;
        }
        if other.chat.is_some() {
            self.chat = other.chat;
        }
        if other.storage.is_some() {
            self.storage = other.storage;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    pub fn llm_config(&self) -> LlmConfig {
        self.llm.clone().unwrap_or_default()
    }

    pub fn embedding_config(&self) -> EmbeddingConfig {
        self.embedding.clone().unwrap_or_default()
    }

    pub fn session_config(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    pub fn retrieval_config(&self) -> RetrievalConfig {
        self.retrieval.clone().unwrap_or_default()
    }

    pub fn chat_config(&self) -> ChatConfig {
        self.chat.clone().unwrap_or_default()
    }

    pub fn storage_config(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    pub fn logging_config(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> crate::Result<()> {
        let session = self.session_config();
        let positive = [
            ("session.cache_max_sessions", session.cache_max_sessions),
            ("session.cache_tail_len", session.cache_tail_len),
            ("session.summary_interval", session.summary_interval),
            ("session.max_message_chars", session.max_message_chars),
            ("retrieval.limit", self.retrieval_config().limit),
            ("embedding.dimensions", self.embedding_config().dimensions),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(crate::ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        let llm = self.llm_config();
        if !(0.0..=2.0).contains(&llm.temperature) {
            return Err(crate::ConfigError::InvalidValue {
                field: "llm.temperature".to_string(),
                reason: format!("{} is outside [0.0, 2.0]", llm.temperature),
            });
        }
        if !(0.0..=1.0).contains(&llm.top_p) {
            return Err(crate::ConfigError::InvalidValue {
                field: "llm.top_p".to_string(),
                reason: format!("{} is outside [0.0, 1.0]", llm.top_p),
            });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the generation provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider preset.
    pub provider: Provider,
    /// Model identifier; the provider's default when unset.
    pub model: Option<String>,
    /// Custom API base URL (for proxies, custom endpoints).
    pub base_url: Option<String>,
    /// API key (prefer an env var; warns if set here).
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum retry attempts for retryable failures.
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Openai,
            model: None,
            base_url: None,
            api_key: None,
            temperature: 0.7,
            max_tokens: 1000,
            top_p: 1.0,
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

impl LlmConfig {
    /// Returns true if an API key is stored directly in the config file.
    pub fn has_plaintext_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Supported generation providers.
///
/// Every provider except `mock` speaks the OpenAI chat-completions protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Deepseek,
    Qwen,
    Moonshot,
    Zhipu,
    Yi,
    Baichuan,
    Groq,
    Ollama,
    Mock,
}

impl Provider {
    pub const ALL: [Provider; 10] = [
        Provider::Openai,
        Provider::Deepseek,
        Provider::Qwen,
        Provider::Moonshot,
        Provider::Zhipu,
        Provider::Yi,
        Provider::Baichuan,
        Provider::Groq,
        Provider::Ollama,
        Provider::Mock,
    ];

    /// Environment variable name for this provider's API key.
    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::Openai => "OPENAI_API_KEY",
            Provider::Deepseek => "DEEPSEEK_API_KEY",
            Provider::Qwen => "QWEN_API_KEY",
            Provider::Moonshot => "MOONSHOT_API_KEY",
            Provider::Zhipu => "ZHIPU_API_KEY",
            Provider::Yi => "YI_API_KEY",
            Provider::Baichuan => "BAICHUAN_API_KEY",
            Provider::Groq => "GROQ_API_KEY",
            Provider::Ollama => "OLLAMA_API_KEY",
            Provider::Mock => "CONCIERGE_MOCK_API_KEY",
        }
    }

    /// Whether requests fail without a key.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Provider::Ollama | Provider::Mock)
    }

    /// Config-file name of the provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::Deepseek => "deepseek",
            Provider::Qwen => "qwen",
            Provider::Moonshot => "moonshot",
            Provider::Zhipu => "zhipu",
            Provider::Yi => "yi",
            Provider::Baichuan => "baichuan",
            Provider::Groq => "groq",
            Provider::Ollama => "ollama",
            Provider::Mock => "mock",
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Openai => "OpenAI",
            Provider::Deepseek => "DeepSeek",
            Provider::Qwen => "Qwen",
            Provider::Moonshot => "Moonshot",
            Provider::Zhipu => "Zhipu",
            Provider::Yi => "Yi",
            Provider::Baichuan => "Baichuan",
            Provider::Groq => "Groq",
            Provider::Ollama => "Ollama",
            Provider::Mock => "Mock",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Embedding provider configuration.
///
/// ```toml
/// [embedding]
/// provider = "openai"
/// model = "text-embedding-3-small"
/// dimensions = 1536
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: Option<String>,
    pub dimensions: usize,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::None,
            model: None,
            dimensions: 384,
            base_url: None,
            api_key: None,
        }
    }
}

/// Which embedder to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// No embedder; retrieval uses keyword search only.
    None,
    /// OpenAI-compatible `/embeddings` endpoint.
    Openai,
    /// Deterministic hash-based vectors.
    Mock,
}

impl EmbeddingProvider {
    pub fn env_var(&self) -> &'static str {
        match self {
            EmbeddingProvider::Openai => "OPENAI_API_KEY",
            EmbeddingProvider::None | EmbeddingProvider::Mock => "CONCIERGE_EMBEDDING_API_KEY",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session cache, history, and summary configuration.
///
/// ```toml
/// [session]
/// cache_ttl_secs = 3600
/// history_window = 10
/// summary_interval = 20
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Absolute lifetime of a cached session.
    pub cache_ttl_secs: u64,
    /// Maximum number of sessions to keep in cache before LRU eviction.
    pub cache_max_sessions: usize,
    /// Most recent turns held per cached session.
    pub cache_tail_len: usize,
    /// Turns included in the assembled prompt.
    pub history_window: usize,
    /// Turns between summaries.
    pub summary_interval: usize,
    /// Longest accepted user message, in characters.
    pub max_message_chars: usize,
    /// Sessions idle longer than this are purged.
    pub inactive_days: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            cache_max_sessions: 10_000,
            cache_tail_len: 50,
            history_window: 10,
            summary_interval: 20,
            max_message_chars: 2000,
            inactive_days: 30,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retrieval Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Knowledge retrieval configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Whether turns consult the knowledge catalog at all.
    pub enabled: bool,
    /// `keyword`, `vector`, or `hybrid`.
    pub mode: String,
    /// Entries handed to the prompt per turn.
    pub limit: usize,
    pub vector_index: VectorIndexKind,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: "hybrid".to_string(),
            limit: 3,
            vector_index: VectorIndexKind::Sqlite,
        }
    }
}

/// Vector index backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorIndexKind {
    /// sqlite-vec table next to the main database.
    Sqlite,
    /// In-process index rebuilt from the catalog at startup.
    Memory,
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat Configuration
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional customer service assistant. \
     Answer the user's questions in a friendly, professional tone.";

pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "Sorry, I can't process your request right now. Please try again later.";

/// Prompt text and domain hints.
///
/// ```toml
/// [chat]
/// system_prompt = "You are a helpful assistant."
///
/// [chat.domain_hints]
/// billing = "Focus on invoices and payment questions."
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub system_prompt: String,
    /// Returned to the caller when generation fails.
    pub fallback_message: String,
    /// Extra instruction keyed by the request's `source` metadata.
    pub domain_hints: BTreeMap<String, String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        let domain_hints = BTreeMap::from([
            (
                "product".to_string(),
                "Pay particular attention to product inquiries and give detailed, accurate product information."
                    .to_string(),
            ),
            (
                "support".to_string(),
                "Focus on technical support and problem solving, and give clear solutions."
                    .to_string(),
            ),
        ]);
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            domain_hints,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Where databases and logs live.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to the platform data directory (`~/.local/share/concierge`).
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Effective data directory.
    pub fn resolve_data_dir(&self) -> crate::Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|d| d.join("concierge"))
            .ok_or(crate::ConfigError::NoDataDir)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Log output configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Write JSON logs under `<data_dir>/logs`.
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ConciergeConfig::from_toml("").unwrap();
        assert!(config.llm.is_none());

        let llm = config.llm_config();
        assert_eq!(llm.provider, Provider::Openai);
        assert_eq!(llm.temperature, 0.7);
        assert_eq!(llm.max_tokens, 1000);

        let session = config.session_config();
        assert_eq!(session.cache_ttl_secs, 3600);
        assert_eq!(session.history_window, 10);
        assert_eq!(session.summary_interval, 20);

        let retrieval = config.retrieval_config();
        assert!(retrieval.enabled);
        assert_eq!(retrieval.mode, "hybrid");
        assert_eq!(retrieval.limit, 3);

        assert_eq!(config.embedding_config().provider, EmbeddingProvider::None);
        assert!(config.chat_config().domain_hints.contains_key("support"));
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let config = ConciergeConfig::from_toml(
            r#"
[llm]
provider = "deepseek"

[session]
history_window = 4
"#,
        )
        .unwrap();

        let llm = config.llm_config();
        assert_eq!(llm.provider, Provider::Deepseek);
        assert_eq!(llm.max_retries, 3);

        let session = config.session_config();
        assert_eq!(session.history_window, 4);
        assert_eq!(session.cache_tail_len, 50);
    }

    #[test]
    fn test_merge_replaces_sections() {
        let mut base = ConciergeConfig::from_toml(
            r#"
[llm]
provider = "qwen"

[retrieval]
limit = 5
"#,
        )
        .unwrap();
        let overlay = ConciergeConfig::from_toml(
            r#"
[llm]
provider = "mock"
"#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.llm_config().provider, Provider::Mock);
        assert_eq!(base.retrieval_config().limit, 5);
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = ConciergeConfig::new();
        config.llm = Some(LlmConfig {
            provider: Provider::Ollama,
            model: Some("llama3".to_string()),
            ..Default::default()
        });
        config.chat = Some(ChatConfig::default());

        let text = config.to_toml().unwrap();
        let parsed = ConciergeConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result = ConciergeConfig::from_toml("[llm]\nprovider = \"gemini\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let config = ConciergeConfig::from_toml("[retrieval]\nlimit = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retrieval.limit"));

        assert!(ConciergeConfig::new().validate().is_ok());
    }

    #[test]
    fn test_provider_env_vars() {
        assert_eq!(Provider::Deepseek.env_var(), "DEEPSEEK_API_KEY");
        assert!(Provider::Openai.requires_api_key());
        assert!(!Provider::Mock.requires_api_key());
        assert_eq!(Provider::ALL.len(), 10);
        for provider in Provider::ALL {
            let parsed: LlmConfig =
                toml::from_str(&format!("provider = \"{}\"", provider.as_str())).unwrap();
            assert_eq!(parsed.provider, provider);
        }
    }

    #[test]
    fn test_explicit_data_dir() {
        let storage = StorageConfig {
            data_dir: Some(PathBuf::from("/tmp/concierge-test")),
        };
        assert_eq!(
            storage.resolve_data_dir().unwrap(),
            PathBuf::from("/tmp/concierge-test")
        );
    }
}
