//! Periodic conversation summaries.
//!
//! Every `interval` turns the chat service schedules a summary of the
//! latest stretch of a session. Summaries run in the background; a failure
//! is logged and never reaches the turn that scheduled it.

use std::sync::Arc;

use concierge_llm::{CompletionRequest, Message, SharedBackend};
use concierge_memory::{
    ConversationSummary, ConversationTurn, Role, SessionRecord, SessionStore, SummaryStore,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{DomainError, Result};
use crate::services::GenerationParams;

const SUMMARY_INSTRUCTION: &str = "Summarize the following customer service conversation in \
     two or three sentences. Mention what the customer asked for and how it was resolved.";

/// Token budget for one summary.
const SUMMARY_MAX_TOKENS: u32 = 200;

/// Whether `record` has accumulated enough turns since its last summary.
pub fn summary_due(record: &SessionRecord, interval: usize) -> bool {
    interval > 0 && record.turns_since_summary() >= interval
}

/// Generates and stores conversation summaries.
#[derive(Clone)]
pub struct Summarizer {
    backend: SharedBackend,
    sessions: Arc<dyn SessionStore>,
    summaries: Arc<dyn SummaryStore>,
    params: GenerationParams,
    interval: usize,
}

impl Summarizer {
    pub fn new(
        backend: SharedBackend,
        sessions: Arc<dyn SessionStore>,
        summaries: Arc<dyn SummaryStore>,
        params: GenerationParams,
        interval: usize,
    ) -> Self {
        Self {
            backend,
            sessions,
            summaries,
            params,
            interval,
        }
    }

    /// Turns between summaries.
    pub fn interval(&self) -> usize {
        self.interval
    }

    /// Summarize the latest `interval` turns and store the result as
    /// covering the first `covers_turns` turns.
    pub async fn summarize(&self, session_id: &str, covers_turns: usize) -> Result<ConversationSummary> {
        let turns = self
            .sessions
            .read_turns(session_id, self.interval.max(1), 0)?;
        if turns.is_empty() {
            return Err(DomainError::NotFound(format!("session {}", session_id)));
        }

        let request = CompletionRequest::new(
            self.params.model.clone(),
            vec![
                Message::system(SUMMARY_INSTRUCTION),
                Message::user(transcript(&turns)),
            ],
            SUMMARY_MAX_TOKENS,
        )
        .with_temperature(self.params.temperature);

        let response = tokio::time::timeout(self.params.timeout, self.backend.complete(request))
            .await
            .map_err(|_| concierge_llm::LlmError::Timeout(self.params.timeout))??;

        let summary = ConversationSummary::new(session_id, response.content.trim(), covers_turns);
        self.summaries.save_summary(&summary)?;
        info!(session_id = %session_id, covers_turns, "Conversation summary stored");
        Ok(summary)
    }

    /// Run [`summarize`](Self::summarize) in the background.
    pub fn spawn(&self, session_id: String, covers_turns: usize) -> JoinHandle<()> {
        let summarizer = self.clone();
        debug!(session_id = %session_id, covers_turns, "Scheduling conversation summary");
        tokio::spawn(async move {
            if let Err(e) = summarizer.summarize(&session_id, covers_turns).await {
                warn!(session_id = %session_id, error = %e, "Conversation summary failed");
            }
        })
    }
}

fn transcript(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .filter(|t| t.role != Role::System)
        .map(|t| {
            let speaker = match t.role {
                Role::Assistant => "Assistant",
                _ => "Customer",
            };
            format!("{}: {}", speaker, t.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
