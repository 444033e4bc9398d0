//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use concierge_domain::{
    DomainConfig, DomainServices, Stores, TurnEvent, TurnOptions, TurnOutcome, TurnRequest,
};
use concierge_llm::{MockBackend, MockEmbedder};
use concierge_memory::{
    ConversationTurn, InMemoryVectorIndex, MemoryError, Role, SessionRecord, SessionStore,
    SqliteStore,
};
use futures::StreamExt;

pub const DIMENSIONS: usize = 32;

/// Domain services over an in-memory database and a mock backend.
pub struct TestDomain {
    pub services: DomainServices,
    pub store: Arc<SqliteStore>,
    pub backend: Arc<MockBackend>,
}

impl TestDomain {
    pub fn new(backend: MockBackend) -> Self {
        Self::with_config(backend, DomainConfig::default())
    }

    pub fn with_config(backend: MockBackend, config: DomainConfig) -> Self {
        let store = Arc::new(SqliteStore::open_in_memory().expect("in-memory store"));
        Self::build(backend, Stores::sqlite(store.clone()), store, false, config)
    }

    /// Enable vector search with a deterministic embedder.
    pub fn with_vectors(backend: MockBackend, config: DomainConfig) -> Self {
        let store = Arc::new(SqliteStore::open_in_memory().expect("in-memory store"));
        Self::build(backend, Stores::sqlite(store.clone()), store, true, config)
    }

    /// Route session appends through a [`FlakyStore`].
    pub fn with_flaky_sessions(backend: MockBackend, flaky: Arc<FlakyStore>) -> Self {
        let store = flaky.inner.clone();
        let mut stores = Stores::sqlite(store.clone());
        stores.sessions = flaky;
        Self::build(backend, stores, store, false, DomainConfig::default())
    }

    fn build(
        backend: MockBackend,
        stores: Stores,
        store: Arc<SqliteStore>,
        vectors: bool,
        config: DomainConfig,
    ) -> Self {
        let backend = Arc::new(backend);
        let (embedder, index) = if vectors {
            (
                Some(Arc::new(MockEmbedder::new(DIMENSIONS)) as concierge_llm::SharedEmbedder),
                Some(Arc::new(InMemoryVectorIndex::new(DIMENSIONS))
                    as concierge_memory::SharedVectorIndex),
            )
        } else {
            (None, None)
        };
        let services = DomainServices::new(backend.clone(), embedder, stores, index, config);
        Self {
            services,
            store,
            backend,
        }
    }

    /// Send one message with default options.
    pub async fn say(&self, session_id: &str, message: &str) -> Result<TurnOutcome> {
        Ok(self
            .services
            .chat()
            .send(
                TurnRequest::new(message).with_session(session_id),
                TurnOptions::default(),
            )
            .await?)
    }

    /// Run a streamed turn to the end and collect its events.
    pub async fn stream_all(
        &self,
        request: TurnRequest,
        options: TurnOptions,
    ) -> Result<Vec<TurnEvent>> {
        let stream = self.services.chat().stream(request, options).await?;
        Ok(stream.collect().await)
    }

    /// Append alternating user/assistant turns straight to the log.
    pub fn seed_turns(&self, session_id: &str, count: usize) {
        for i in 0..count {
            let turn = if i % 2 == 0 {
                ConversationTurn::user(session_id, format!("question {}", i))
            } else {
                ConversationTurn::assistant(session_id, format!("answer {}", i))
            };
            self.store.append_turn(&turn).expect("seed turn");
        }
    }
}

/// Session log that can be told to fail appends of one role.
pub struct FlakyStore {
    pub inner: Arc<SqliteStore>,
    fail_user: AtomicBool,
    fail_assistant: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(SqliteStore::open_in_memory().expect("in-memory store")),
            fail_user: AtomicBool::new(false),
            fail_assistant: AtomicBool::new(false),
        })
    }

    pub fn fail_appends(&self, role: Role) {
        match role {
            Role::User => self.fail_user.store(true, Ordering::SeqCst),
            Role::Assistant => self.fail_assistant.store(true, Ordering::SeqCst),
            Role::System => {}
        }
    }
}

impl SessionStore for FlakyStore {
    fn append_turn(&self, turn: &ConversationTurn) -> concierge_memory::Result<SessionRecord> {
        let failing = match turn.role {
            Role::User => self.fail_user.load(Ordering::SeqCst),
            Role::Assistant => self.fail_assistant.load(Ordering::SeqCst),
            Role::System => false,
        };
        if failing {
            return Err(MemoryError::Query("disk I/O error".to_string()));
        }
        self.inner.append_turn(turn)
    }

    fn read_turns(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> concierge_memory::Result<Vec<ConversationTurn>> {
        self.inner.read_turns(session_id, limit, offset)
    }

    fn count_turns(&self, session_id: &str) -> concierge_memory::Result<usize> {
        self.inner.count_turns(session_id)
    }

    fn delete_session(&self, session_id: &str) -> concierge_memory::Result<bool> {
        self.inner.delete_session(session_id)
    }
}

/// Poll `check` until it returns true or `within` elapses.
pub async fn eventually<F>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
