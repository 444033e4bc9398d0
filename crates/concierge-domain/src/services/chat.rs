//! Chat service for conversation orchestration.
//!
//! One call drives one turn through [`TurnState`]:
//!
//! 1. Validate the request (nothing is written on failure).
//! 2. Lock the session, load its recent history, persist the user turn.
//! 3. Retrieve knowledge; a search failure only drops the context.
//! 4. Assemble the prompt and generate under a deadline and an optional
//!    cancellation token.
//! 5. Persist the assistant turn and, every `summary_interval` turns,
//!    schedule a background summary.
//!
//! If generation fails the caller gets the configured apology with a
//! [`TurnFailure`]; the user's turn stays persisted and the apology is not
//! stored.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use concierge_llm::{
    CompletionRequest, CompletionResponse, LlmError, SharedBackend, StreamEvent, Usage,
};
use concierge_memory::{
    ConversationTurn, EntryId, KnowledgeEntry, Metadata, SessionRecord, validate_session_id,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DomainError, ErrorKind, Result};
use crate::services::DomainConfig;
use crate::services::context::ContextAssembler;
use crate::services::locks::SessionGuard;
use crate::services::retrieval::{RetrievalEngine, SearchMode};
use crate::services::sessions::SessionService;
use crate::services::summary::{Summarizer, summary_due};
use crate::services::turn::{TurnFailure, TurnMachine, TurnState};

/// Metadata key selecting a domain hint.
pub const SOURCE_KEY: &str = "source";

// ─────────────────────────────────────────────────────────────────────────────
// Requests and Results
// ─────────────────────────────────────────────────────────────────────────────

/// A new user message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Session to append to; a fresh id is generated when absent.
    pub session_id: Option<String>,
    pub message: String,
    pub owner_id: Option<String>,
    /// Stored on the user turn. `source` selects a domain hint.
    #[serde(default)]
    pub metadata: Metadata,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Tag the request with where it came from, e.g. `product` or `support`.
    pub fn with_source(self, source: impl Into<String>) -> Self {
        self.with_metadata(SOURCE_KEY, json!(source.into()))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).and_then(|v| v.as_str())
    }
}

/// Per-turn overrides of the service configuration.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    pub search_mode: Option<SearchMode>,
    pub search_limit: Option<usize>,
    /// Set to `false` to skip knowledge retrieval.
    pub use_knowledge: Option<bool>,
    /// Generation deadline.
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl TurnOptions {
    pub fn with_search(mut self, mode: SearchMode, limit: usize) -> Self {
        self.search_mode = Some(mode);
        self.search_limit = Some(limit);
        self
    }

    pub fn without_knowledge(mut self) -> Self {
        self.use_knowledge = Some(false);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// A knowledge entry that informed a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeRef {
    pub id: EntryId,
    pub title: String,
}

/// Result of one turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub session_id: String,
    /// The assistant reply, or the fallback apology when `failure` is set.
    pub message: String,
    pub usage: Usage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub state: TurnState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TurnFailure>,
    pub knowledge: Vec<KnowledgeRef>,
    /// Persisted turns in the session after this turn.
    pub turn_count: usize,
    pub summary_scheduled: bool,
    pub trail: Vec<TurnState>,
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Event in a streamed turn.
///
/// A stream is `Started`, any number of `Delta`s, then exactly one of
/// `Completed` or `Failed`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Started {
        session_id: String,
    },
    /// Next fragment of the reply.
    Delta {
        text: String,
    },
    Completed {
        outcome: TurnOutcome,
    },
    Failed {
        kind: ErrorKind,
        message: String,
        /// Reply text delivered before the failure.
        partial: String,
        /// Apology to show in place of the reply.
        fallback: String,
    },
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Completed { .. } | TurnEvent::Failed { .. })
    }
}

/// A streamed turn.
pub type TurnStream = Pin<Box<dyn Stream<Item = TurnEvent> + Send + 'static>>;

// ─────────────────────────────────────────────────────────────────────────────
// Chat Service
// ─────────────────────────────────────────────────────────────────────────────

/// A turn that has passed validation and persisted its user message.
struct PreparedTurn {
    _guard: SessionGuard,
    machine: TurnMachine,
    session_id: String,
    owner_id: Option<String>,
    request: CompletionRequest,
    prompt_chars: usize,
    knowledge: Vec<KnowledgeRef>,
    turn_count: usize,
    timeout: Duration,
    cancellation: CancellationToken,
}

/// Generated reply ready to persist.
struct Reply {
    model: String,
    content: String,
    usage: Usage,
}

/// Chat service for conversation orchestration.
#[derive(Clone)]
pub struct ChatService {
    backend: SharedBackend,
    sessions: SessionService,
    retrieval: RetrievalEngine,
    assembler: ContextAssembler,
    summarizer: Summarizer,
    config: Arc<DomainConfig>,
}

impl ChatService {
    pub fn new(
        backend: SharedBackend,
        sessions: SessionService,
        retrieval: RetrievalEngine,
        summarizer: Summarizer,
        config: Arc<DomainConfig>,
    ) -> Self {
        let assembler = ContextAssembler::new(config.context.clone());
        Self {
            backend,
            sessions,
            retrieval,
            assembler,
            summarizer,
            config,
        }
    }

    /// The generation backend.
    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    /// Run one turn to completion.
    ///
    /// Returns `Err` for validation and storage failures. Generation
    /// failures come back as `Ok` with `failure` set and the fallback
    /// apology as the message.
    pub async fn send(&self, request: TurnRequest, options: TurnOptions) -> Result<TurnOutcome> {
        let mut turn = self.prepare(request, &options).await?;
        turn.machine.advance(TurnState::Generating)?;

        let generated = generate(
            &self.backend,
            turn.request.clone(),
            turn.timeout,
            &turn.cancellation,
        )
        .await;

        match generated {
            Ok(response) => {
                let reply = Reply {
                    usage: usage_or_estimate(&response, turn.prompt_chars),
                    model: response.model,
                    content: response.content,
                };
                self.complete(turn, reply).await
            }
            Err(e) => Ok(self.fallback(turn, &e)),
        }
    }

    /// Run one turn, delivering the reply incrementally.
    ///
    /// Validation and user-turn persistence happen before this returns;
    /// their failures are returned as `Err`. The session stays locked until
    /// the stream finishes or is dropped.
    pub async fn stream(&self, request: TurnRequest, options: TurnOptions) -> Result<TurnStream> {
        let mut turn = self.prepare(request, &options).await?;
        turn.machine.advance(TurnState::Generating)?;
        let this = self.clone();

        Ok(Box::pin(async_stream::stream! {
            let turn = turn;
            yield TurnEvent::Started { session_id: turn.session_id.clone() };

            let timeout = turn.timeout;
            let deadline = Instant::now() + timeout;
            let cancel = turn.cancellation.clone();
            let mut transcript = String::new();
            let mut model = turn.request.model.clone();
            let mut usage = Usage::default();
            let mut failure: Option<LlmError> = None;

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LlmError::Cancelled),
                r = tokio::time::timeout_at(
                    deadline,
                    this.backend.complete_stream(turn.request.clone().with_streaming()),
                ) => r.unwrap_or_else(|_| Err(LlmError::Timeout(timeout))),
            };

            match opened {
                Err(e) => failure = Some(e),
                Ok(mut events) => loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(LlmError::Cancelled),
                        n = tokio::time::timeout_at(deadline, events.next()) => {
                            n.map_err(|_| LlmError::Timeout(timeout))
                        }
                    };

                    match next {
                        Err(e) | Ok(Some(Err(e))) => {
                            failure = Some(e);
                            break;
                        }
                        Ok(None) | Ok(Some(Ok(StreamEvent::MessageStop))) => break,
                        Ok(Some(Ok(StreamEvent::MessageStart { model: m, .. }))) => model = m,
                        Ok(Some(Ok(StreamEvent::TextDelta { text }))) => {
                            transcript.push_str(&text);
                            yield TurnEvent::Delta { text };
                        }
                        Ok(Some(Ok(StreamEvent::MessageDelta { usage: u, .. }))) => usage = u,
                        Ok(Some(Ok(StreamEvent::Error { message }))) => {
                            failure = Some(LlmError::Backend(message));
                            break;
                        }
                        Ok(Some(Ok(StreamEvent::Ping))) => {}
                    }
                },
            }

            if let Some(err) = failure {
                let outcome = this.fallback(turn, &err);
                yield TurnEvent::Failed {
                    kind: ErrorKind::from(&err),
                    message: err.to_string(),
                    partial: transcript,
                    fallback: outcome.message,
                };
                return;
            }

            if usage.is_empty() {
                usage = Usage::estimate(turn.prompt_chars, transcript.chars().count());
            }
            let reply = Reply { model, content: transcript.clone(), usage };
            match this.complete(turn, reply).await {
                Ok(outcome) => yield TurnEvent::Completed { outcome },
                Err(e) => yield TurnEvent::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                    partial: transcript,
                    fallback: this.config.fallback_message.clone(),
                },
            }
        }))
    }

    // ── Turn stages ──────────────────────────────────────────────────────────

    fn validate(&self, request: &TurnRequest, options: &TurnOptions) -> Result<String> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(DomainError::validation("message must not be empty"));
        }
        let chars = message.chars().count();
        if chars > self.config.max_message_chars {
            return Err(DomainError::validation(format!(
                "message is {} characters, the limit is {}",
                chars, self.config.max_message_chars
            )));
        }
        if let Some(session_id) = &request.session_id {
            validate_session_id(session_id)?;
        }
        if options.search_limit == Some(0) {
            return Err(DomainError::validation("search limit must be at least 1"));
        }
        Ok(message.to_string())
    }

    async fn prepare(&self, request: TurnRequest, options: &TurnOptions) -> Result<PreparedTurn> {
        let message = self.validate(&request, options)?;
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let guard = self.sessions.lock(&session_id).await;
        let mut machine = TurnMachine::new(&session_id);
        debug!(session_id = %session_id, message_len = message.len(), "Turn received");

        let window = self.config.history_window;
        let history = self.sessions.recent_locked(&session_id, window).await?;
        machine.advance(TurnState::HistoryLoaded)?;

        let mut user_turn =
            ConversationTurn::user(&session_id, &message).with_owner(request.owner_id.clone());
        user_turn.metadata = request.metadata.clone();
        let record: SessionRecord = self.sessions.append(user_turn).await?;

        let knowledge = self.retrieve(&message, options).await;
        let messages = self.assembler.build(
            &history,
            &message,
            &knowledge,
            request.source(),
            window,
        );
        machine.advance(TurnState::ContextAssembled)?;

        let params = &self.config.generation;
        let completion = CompletionRequest::new(params.model.clone(), messages, params.max_tokens)
            .with_temperature(params.temperature)
            .with_top_p(params.top_p);

        Ok(PreparedTurn {
            _guard: guard,
            machine,
            prompt_chars: completion.prompt_chars(),
            request: completion,
            session_id,
            owner_id: request.owner_id,
            knowledge: knowledge
                .into_iter()
                .map(|e| KnowledgeRef {
                    id: e.id,
                    title: e.title,
                })
                .collect(),
            turn_count: record.turn_count,
            timeout: options.timeout.unwrap_or(params.timeout),
            cancellation: options.cancellation.clone().unwrap_or_default(),
        })
    }

    async fn retrieve(&self, query: &str, options: &TurnOptions) -> Vec<KnowledgeEntry> {
        if !options.use_knowledge.unwrap_or(self.config.retrieval_enabled) {
            return Vec::new();
        }
        let mode = options.search_mode.unwrap_or(self.config.retrieval_mode);
        let limit = options.search_limit.unwrap_or(self.config.retrieval_limit);

        match self.retrieval.search(query, limit, mode).await {
            Ok(hits) => hits.into_iter().map(|h| h.entry).collect(),
            Err(e) => {
                warn!(error = %e, mode = ?mode, "Knowledge retrieval failed, continuing without context");
                Vec::new()
            }
        }
    }

    /// Persist the reply, run the summary check, and finish the turn.
    async fn complete(&self, mut turn: PreparedTurn, reply: Reply) -> Result<TurnOutcome> {
        let assistant_turn = ConversationTurn::assistant(&turn.session_id, &reply.content)
            .with_owner(turn.owner_id.clone())
            .with_metadata("model", json!(reply.model))
            .with_metadata(
                "usage",
                json!({
                    "input_tokens": reply.usage.input_tokens,
                    "output_tokens": reply.usage.output_tokens,
                }),
            );

        let record = match self.sessions.append(assistant_turn).await {
            Ok(record) => record,
            Err(e) => {
                turn.machine.fail();
                warn!(session_id = %turn.session_id, error = %e, "Failed to persist reply");
                return Err(e);
            }
        };
        turn.machine.advance(TurnState::Persisted)?;

        turn.machine.advance(TurnState::SummaryCheck)?;
        let summary_scheduled = self.schedule_summary(&record);
        turn.machine.advance(TurnState::Done)?;

        info!(
            session_id = %turn.session_id,
            turn_count = record.turn_count,
            input_tokens = reply.usage.input_tokens,
            output_tokens = reply.usage.output_tokens,
            "Turn completed"
        );

        Ok(TurnOutcome {
            session_id: turn.session_id,
            message: reply.content,
            usage: reply.usage,
            model: Some(reply.model),
            state: turn.machine.state(),
            failure: None,
            knowledge: turn.knowledge,
            turn_count: record.turn_count,
            summary_scheduled,
            trail: turn.machine.trail().to_vec(),
        })
    }

    /// End the turn in `Error` with the fallback apology.
    fn fallback(&self, mut turn: PreparedTurn, err: &LlmError) -> TurnOutcome {
        turn.machine.fail();
        warn!(session_id = %turn.session_id, error = %err, "Generation failed, returning fallback");

        TurnOutcome {
            session_id: turn.session_id,
            message: self.config.fallback_message.clone(),
            usage: Usage::default(),
            model: None,
            state: turn.machine.state(),
            failure: Some(TurnFailure {
                kind: ErrorKind::from(err),
                message: err.to_string(),
            }),
            knowledge: turn.knowledge,
            turn_count: turn.turn_count,
            summary_scheduled: false,
            trail: turn.machine.trail().to_vec(),
        }
    }

    fn schedule_summary(&self, record: &SessionRecord) -> bool {
        if !summary_due(record, self.summarizer.interval()) {
            return false;
        }
        if let Err(e) = self
            .sessions
            .mark_summarized(&record.session_id, record.turn_count)
        {
            warn!(session_id = %record.session_id, error = %e, "Could not mark summary, skipping");
            return false;
        }
        self.summarizer
            .spawn(record.session_id.clone(), record.turn_count);
        true
    }
}

/// Call the backend under a deadline, racing an optional cancellation.
async fn generate(
    backend: &SharedBackend,
    request: CompletionRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> std::result::Result<CompletionResponse, LlmError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LlmError::Cancelled),
        result = tokio::time::timeout(timeout, backend.complete(request)) => {
            result.unwrap_or_else(|_| Err(LlmError::Timeout(timeout)))
        }
    }
}

fn usage_or_estimate(response: &CompletionResponse, prompt_chars: usize) -> Usage {
    if response.usage.is_empty() {
        Usage::estimate(prompt_chars, response.content.chars().count())
    } else {
        response.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = TurnRequest::new("hi")
            .with_session("s1")
            .with_owner("u1")
            .with_source("product");
        assert_eq!(request.session_id.as_deref(), Some("s1"));
        assert_eq!(request.owner_id.as_deref(), Some("u1"));
        assert_eq!(request.source(), Some("product"));
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = TurnEvent::Delta {
            text: "Hel".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "delta");
        assert_eq!(json["text"], "Hel");
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_usage_estimate_when_provider_reports_none() {
        let response = CompletionResponse::new(
            "id",
            "m",
            "abcde",
            concierge_llm::StopReason::EndTurn,
            Usage::default(),
        );
        assert_eq!(usage_or_estimate(&response, 10), Usage::new(4, 2));

        let reported = CompletionResponse::new(
            "id",
            "m",
            "abcde",
            concierge_llm::StopReason::EndTurn,
            Usage::new(7, 3),
        );
        assert_eq!(usage_or_estimate(&reported, 10), Usage::new(7, 3));
    }
}
