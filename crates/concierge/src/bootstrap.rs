//! Wiring from configuration to running services.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use concierge_config::{
    ConciergeConfig, EmbeddingConfig, EmbeddingProvider, LlmConfig, Provider, VectorIndexKind,
    resolve_api_key,
};
use concierge_domain::{DomainConfig, DomainServices, Stores};
use concierge_llm::{
    EmbedderSpec, MockBackend, OpenAiBackend, OpenAiConfig, OpenAiEmbedderConfig, SharedBackend,
    SharedEmbedder, build_embedder,
};
use concierge_memory::{InMemoryVectorIndex, SharedVectorIndex, SqliteStore, SqliteVectorIndex};
use tracing::{debug, info, warn};

const DATABASE_FILE: &str = "concierge.db";
const VECTOR_FILE: &str = "vectors.db";

/// Everything a command needs.
pub struct App {
    pub services: DomainServices,
    pub config: ConciergeConfig,
    pub data_dir: PathBuf,
}

impl App {
    /// Open the stores and build the services described by `config`.
    pub async fn open(config: ConciergeConfig) -> Result<Self> {
        config.validate()?;
        let data_dir = config.storage_config().resolve_data_dir()?;
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let store = Arc::new(
            SqliteStore::open(data_dir.join(DATABASE_FILE))
                .with_context(|| format!("Failed to open database in {}", data_dir.display()))?,
        );

        let backend = create_backend(&config.llm_config())?;
        let embedder = create_embedder(&config.embedding_config())?;
        let vectors = match &embedder {
            Some(embedder) => Some(create_vector_index(
                &data_dir,
                config.retrieval_config().vector_index,
                embedder.dimensions(),
            )?),
            None => None,
        };

        let domain_config = DomainConfig::from_config(&config)?;
        let services = DomainServices::new(
            backend,
            embedder,
            Stores::sqlite(store),
            vectors.clone(),
            domain_config,
        );

        if let Some(index) = vectors {
            sync_vector_index(&services, &index).await;
        }

        Ok(Self {
            services,
            config,
            data_dir,
        })
    }
}

/// Rebuild the index when it has fallen out of step with the catalog.
async fn sync_vector_index(services: &DomainServices, index: &SharedVectorIndex) {
    let knowledge = services.knowledge();
    let (indexed, entries) = match (index.len(), knowledge.count()) {
        (Ok(indexed), Ok(entries)) => (indexed, entries),
        (Err(e), _) => {
            warn!(error = %e, "Could not inspect vector index");
            return;
        }
        (_, Err(e)) => {
            warn!(error = %e, "Could not count knowledge entries");
            return;
        }
    };
    if indexed == entries {
        debug!(entries, "Vector index in sync");
        return;
    }

    info!(indexed, entries, "Vector index out of sync, rebuilding");
    if let Err(e) = knowledge.resync().await {
        warn!(error = %e, "Vector index rebuild failed; hybrid search will use keywords");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability Construction
// ─────────────────────────────────────────────────────────────────────────────

fn create_backend(config: &LlmConfig) -> Result<SharedBackend> {
    let provider = config.provider;
    let api_key = resolve_api_key(provider.env_var(), config.api_key.as_deref());
    let key = match (&api_key, provider.requires_api_key()) {
        (Some(secret), _) => {
            debug!(provider = %provider, source = %secret.source, "Resolved API key");
            secret.value.clone()
        }
        (None, true) => anyhow::bail!(
            "{} API key required. Set {} or add api_key to the [llm] section",
            provider.display_name(),
            provider.env_var()
        ),
        (None, false) => String::new(),
    };

    let mut openai = match provider {
        Provider::Openai => OpenAiConfig::openai(key),
        Provider::Deepseek => OpenAiConfig::deepseek(key),
        Provider::Qwen => OpenAiConfig::qwen(key),
        Provider::Moonshot => OpenAiConfig::moonshot(key),
        Provider::Zhipu => OpenAiConfig::zhipu(key),
        Provider::Yi => OpenAiConfig::yi(key),
        Provider::Baichuan => OpenAiConfig::baichuan(key),
        Provider::Groq => OpenAiConfig::groq(key),
        Provider::Ollama => OpenAiConfig::ollama(),
        Provider::Mock => {
            info!("Using mock generation backend");
            return Ok(Arc::new(MockBackend::echo()));
        }
    };
    if let Some(ref base_url) = config.base_url {
        openai = openai.with_base_url(base_url);
    }
    if let Some(ref model) = config.model {
        openai = openai.with_model(model);
    }
    openai = openai
        .with_timeout(Duration::from_secs(config.timeout_secs))
        .with_max_retries(config.max_retries);

    info!(provider = %provider, model = ?openai.model, "Using generation backend");
    Ok(Arc::new(OpenAiBackend::new(openai)?))
}

fn create_embedder(config: &EmbeddingConfig) -> Result<Option<SharedEmbedder>> {
    let spec = match config.provider {
        EmbeddingProvider::None => {
            debug!("No embedding provider configured; vector search disabled");
            return Ok(None);
        }
        EmbeddingProvider::Mock => EmbedderSpec::Mock {
            dimensions: config.dimensions,
        },
        EmbeddingProvider::Openai => {
            let secret = resolve_api_key(config.provider.env_var(), config.api_key.as_deref());
            let mut openai = match secret {
                Some(secret) => OpenAiEmbedderConfig::new(secret.value),
                None => OpenAiEmbedderConfig::new("").without_api_key(),
            };
            if let Some(ref base_url) = config.base_url {
                openai = openai.with_base_url(base_url);
            }
            let model = config.model.clone().unwrap_or_else(|| openai.model.clone());
            EmbedderSpec::OpenAi(openai.with_model(model, config.dimensions))
        }
    };
    let embedder = build_embedder(spec).context("Failed to build embedder")?;
    info!(embedder = embedder.name(), dimensions = embedder.dimensions(), "Using embedder");
    Ok(Some(embedder))
}

fn create_vector_index(
    data_dir: &Path,
    kind: VectorIndexKind,
    dimensions: usize,
) -> Result<SharedVectorIndex> {
    Ok(match kind {
        VectorIndexKind::Sqlite => Arc::new(
            SqliteVectorIndex::open(data_dir.join(VECTOR_FILE), dimensions)
                .context("Failed to open vector index")?,
        ),
        VectorIndexKind::Memory => Arc::new(InMemoryVectorIndex::new(dimensions)),
    })
}
