//! Prompt assembly.
//!
//! Produces the ordered message list for one generation call:
//!
//! ```text
//! [system instruction, ...last W history turns, new user message]
//! ```
//!
//! The system instruction is the base prompt, an optional domain hint
//! selected by the request's `source`, the current local time, and a block
//! of retrieved knowledge when there is any.

use std::collections::BTreeMap;

use chrono::{Local, NaiveDateTime};
use concierge_config::{ChatConfig, DEFAULT_SYSTEM_PROMPT};
use concierge_llm::Message;
use concierge_memory::{ConversationTurn, KnowledgeEntry, Role};

/// Default cap on the characters of one knowledge body in the prompt.
pub const DEFAULT_MAX_KNOWLEDGE_CHARS: usize = 1000;

/// Settings for [`ContextAssembler`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Base system prompt.
    pub system_prompt: String,
    /// Extra instruction per request source.
    pub domain_hints: BTreeMap<String, String>,
    /// Knowledge bodies longer than this are cut.
    pub max_knowledge_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

impl From<&ChatConfig> for ContextConfig {
    fn from(chat: &ChatConfig) -> Self {
        let system_prompt = if chat.system_prompt.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT.to_string()
        } else {
            chat.system_prompt.clone()
        };
        Self {
            system_prompt,
            domain_hints: chat.domain_hints.clone(),
            max_knowledge_chars: DEFAULT_MAX_KNOWLEDGE_CHARS,
        }
    }
}

/// Builds generation prompts.
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Build the message list stamped with the current local time.
    pub fn build(
        &self,
        history: &[ConversationTurn],
        user_message: &str,
        knowledge: &[KnowledgeEntry],
        source: Option<&str>,
        window: usize,
    ) -> Vec<Message> {
        self.build_at(
            history,
            user_message,
            knowledge,
            source,
            window,
            Local::now().naive_local(),
        )
    }

    /// Build the message list for a fixed point in time.
    ///
    /// `history` must be chronological. Only user and assistant turns are
    /// replayed, and only the most recent `window` of those.
    pub fn build_at(
        &self,
        history: &[ConversationTurn],
        user_message: &str,
        knowledge: &[KnowledgeEntry],
        source: Option<&str>,
        window: usize,
        now: NaiveDateTime,
    ) -> Vec<Message> {
        let replayable: Vec<&ConversationTurn> = history
            .iter()
            .filter(|t| matches!(t.role, Role::User | Role::Assistant))
            .collect();
        let start = replayable.len().saturating_sub(window);

        let mut messages = Vec::with_capacity(replayable.len() - start + 2);
        messages.push(Message::system(self.system_instruction(knowledge, source, now)));
        messages.extend(replayable[start..].iter().map(|turn| match turn.role {
            Role::Assistant => Message::assistant(&turn.content),
            _ => Message::user(&turn.content),
        }));
        messages.push(Message::user(user_message));
        messages
    }

    /// The system instruction alone.
    pub fn system_instruction(
        &self,
        knowledge: &[KnowledgeEntry],
        source: Option<&str>,
        now: NaiveDateTime,
    ) -> String {
        let mut prompt = self.config.system_prompt.clone();

        if let Some(hint) = source.and_then(|s| self.config.domain_hints.get(s)) {
            prompt.push_str("\n\n");
            prompt.push_str(hint);
        }

        prompt.push_str(&format!(
            "\n\nCurrent time: {}",
            now.format("%Y-%m-%d %H:%M:%S")
        ));

        if !knowledge.is_empty() {
            prompt.push_str("\n\nRelevant knowledge:");
            for (i, entry) in knowledge.iter().enumerate() {
                prompt.push_str(&format!("\n[{}] {}", i + 1, entry.title));
                if let Some(category) = &entry.category {
                    prompt.push_str(&format!(" ({})", category));
                }
                prompt.push('\n');
                prompt.push_str(&truncate_chars(&entry.body, self.config.max_knowledge_chars));
            }
        }

        prompt
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
