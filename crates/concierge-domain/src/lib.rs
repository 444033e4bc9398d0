//! Domain facade for Concierge.
//!
//! This crate orchestrates a customer-service conversation: it keeps each
//! session's history in a durable log fronted by a cache, retrieves relevant
//! knowledge entries, assembles the prompt, calls the generation backend and
//! persists the result.
//!
//! - **Chat orchestration**: one turn at a time per session, driven through
//!   an explicit state machine, with streaming and cancellation
//! - **Retrieval**: vector, keyword, or hybrid search with keyword fallback
//! - **Knowledge**: catalog CRUD with vector index synchronization
//! - **Sessions**: history paging, deletion, inactivity purge, summaries
//!
//! # Example
//!
//! ```ignore
//! use concierge_domain::{DomainConfig, DomainServices, Stores, TurnOptions, TurnRequest};
//!
//! let services = DomainServices::new(backend, None, Stores::sqlite(store), None, DomainConfig::default());
//!
//! let outcome = services
//!     .chat()
//!     .send(TurnRequest::new("How do I reset my password?"), TurnOptions::default())
//!     .await?;
//! ```

mod error;
pub mod services;
pub mod tools;

pub use error::{DomainError, ErrorKind, Result};
pub use services::chat::{
    ChatService, KnowledgeRef, TurnEvent, TurnOptions, TurnOutcome, TurnRequest, TurnStream,
};
pub use services::context::{ContextAssembler, ContextConfig};
pub use services::knowledge::{KnowledgeService, ResyncReport, default_entries};
pub use services::locks::SessionLocks;
pub use services::retrieval::{RetrievalEngine, RetrievalError, ScoredEntry, SearchMode};
pub use services::sessions::SessionService;
pub use services::summary::Summarizer;
pub use services::turn::{TurnFailure, TurnMachine, TurnState};
pub use services::{DomainConfig, DomainServices, GenerationParams, Stores};

// Re-export key types from infrastructure crates for convenience
pub use concierge_memory::{
    ConversationSummary, ConversationTurn, KnowledgeDraft, KnowledgeEntry, SessionRecord,
};
