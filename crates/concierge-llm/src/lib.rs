//! Generation and embedding capabilities for Concierge.
//!
//! The conversation core depends only on two interfaces: [`LlmBackend`]
//! for chat completion (blocking and streaming) and [`Embedder`] for text
//! embeddings. Concrete providers are selected once, at construction time,
//! and handed to the core as shared trait objects.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  LlmBackend trait                       │
//! │  - complete() -> Response               │
//! │  - complete_stream() -> Stream<Event>   │
//! └─────────────────────────────────────────┘
//!                    │
//!          ┌─────────┴─────────┐
//!          ▼                   ▼
//!   ┌──────────────┐     ┌──────────┐
//!   │ OpenAI-compat │     │   Mock   │
//!   │ (presets)     │     │          │
//!   └──────────────┘     └──────────┘
//! ```

pub mod backend;
pub mod embeddings;
pub mod error;
pub mod openai;
pub mod types;

pub use backend::{
    LlmBackend, MockBackend, MockResponse, ResponseStream, SharedBackend, StreamEvent,
    chunk_text, with_retry,
};
pub use error::{LlmError, Result};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StopReason, Usage};

pub use embeddings::{
    Embedder, EmbedderSpec, MockEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig, SharedEmbedder,
    build_embedder, cosine_similarity,
};

pub use openai::{OpenAiBackend, OpenAiConfig};
