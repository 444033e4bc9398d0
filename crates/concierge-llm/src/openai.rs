//! OpenAI-compatible API backend implementation.
//!
//! Most hosted providers (DeepSeek, Qwen, Moonshot, Zhipu, Yi, Baichuan,
//! Groq) and local servers such as Ollama speak the OpenAI chat completions
//! wire format. [`OpenAiConfig`] carries a preset per provider; the backend
//! itself is shared.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response, header};

use crate::backend::{LlmBackend, ResponseStream, StreamEvent, with_retry};
use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse, Message, StopReason, Usage};

/// Default timeout for requests.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key for authentication (optional for local services like Ollama).
    pub api_key: Option<String>,

    /// Base URL for the API.
    pub base_url: String,

    /// Model to use (overrides the request model when set).
    pub model: Option<String>,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum retries for transient errors.
    pub max_retries: u32,

    /// Initial backoff duration for retries.
    pub retry_backoff: Duration,

    /// Name for this backend instance.
    pub name: String,
}

impl OpenAiConfig {
    fn preset(name: &str, base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.to_string(),
            model: Some(model.to_string()),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            name: name.to_string(),
        }
    }

    /// OpenAI.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::preset(
            "openai",
            "https://api.openai.com/v1",
            "gpt-3.5-turbo",
            Some(api_key.into()),
        )
    }

    /// DeepSeek.
    pub fn deepseek(api_key: impl Into<String>) -> Self {
        Self::preset(
            "deepseek",
            "https://api.deepseek.com/v1",
            "deepseek-chat",
            Some(api_key.into()),
        )
    }

    /// Alibaba Qwen (DashScope compatible mode).
    pub fn qwen(api_key: impl Into<String>) -> Self {
        Self::preset(
            "qwen",
            "https://dashscope.aliyuncs.com/compatible-mode/v1",
            "qwen-turbo",
            Some(api_key.into()),
        )
    }

    /// Moonshot.
    pub fn moonshot(api_key: impl Into<String>) -> Self {
        Self::preset(
            "moonshot",
            "https://api.moonshot.cn/v1",
            "moonshot-v1-8k",
            Some(api_key.into()),
        )
    }

    /// Zhipu GLM.
    pub fn zhipu(api_key: impl Into<String>) -> Self {
        Self::preset(
            "zhipu",
            "https://open.bigmodel.cn/api/paas/v4",
            "glm-4",
            Some(api_key.into()),
        )
    }

    /// 01.AI Yi.
    pub fn yi(api_key: impl Into<String>) -> Self {
        Self::preset(
            "yi",
            "https://api.lingyiwanwu.com/v1",
            "yi-34b-chat-0205",
            Some(api_key.into()),
        )
    }

    /// Baichuan.
    pub fn baichuan(api_key: impl Into<String>) -> Self {
        Self::preset(
            "baichuan",
            "https://api.baichuan-ai.com/v1",
            "Baichuan2-Turbo",
            Some(api_key.into()),
        )
    }

    /// Groq.
    pub fn groq(api_key: impl Into<String>) -> Self {
        Self::preset(
            "groq",
            "https://api.groq.com/openai/v1",
            "llama-3.1-70b-versatile",
            Some(api_key.into()),
        )
    }

    /// Ollama (local).
    pub fn ollama() -> Self {
        Self::preset("ollama", "http://localhost:11434/v1", "llama3.1", None)
            .with_timeout(Duration::from_secs(600))
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the default model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set max retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI Backend
// ─────────────────────────────────────────────────────────────────────────────

/// OpenAI-compatible API backend.
pub struct OpenAiBackend {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiBackend {
    /// Create a new OpenAI-compatible backend with the given configuration.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Build the chat completions endpoint URL.
    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Add authentication headers to a request.
    fn add_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header(header::CONTENT_TYPE, "application/json");

        if let Some(ref api_key) = self.config.api_key {
            builder.header(header::AUTHORIZATION, format!("Bearer {}", api_key))
        } else {
            builder
        }
    }

    /// Convert our CompletionRequest to OpenAI-compatible format.
    fn to_openai_request<'a>(&'a self, request: &'a CompletionRequest) -> OpenAiChatRequest<'a> {
        let model = self.config.model.as_deref().unwrap_or(&request.model);

        OpenAiChatRequest {
            model,
            messages: &request.messages,
            max_tokens: Some(request.max_tokens),
            temperature: request.temperature,
            top_p: request.top_p,
            stream: Some(request.stream),
            stop: (!request.stop_sequences.is_empty()).then_some(&request.stop_sequences),
        }
    }

    /// Handle a successful response.
    async fn handle_response(response: Response) -> Result<CompletionResponse> {
        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let body = response.text().await?;
        let parsed: OpenAiChatResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Serialization(e.to_string()))?;

        Ok(parsed.into())
    }

    /// Handle an error response.
    async fn handle_error_response(response: Response) -> LlmError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let message = serde_json::from_str::<OpenAiErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));

        match status.as_u16() {
            401 | 403 => LlmError::Auth(message),
            429 => LlmError::RateLimit(message),
            400 | 422 => LlmError::InvalidRequest(message),
            _ => LlmError::Backend(message),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let mut request = request;
        request.stream = false;

        let openai_request = self.to_openai_request(&request);

        tracing::debug!(
            backend = %self.config.name,
            model = %openai_request.model,
            messages = openai_request.messages.len(),
            "Sending OpenAI-compatible request"
        );

        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            &self.config.name,
            || async {
                let response = self
                    .add_headers(self.client.post(self.completions_url()))
                    .json(&openai_request)
                    .send()
                    .await?;

                Self::handle_response(response).await
            },
        )
        .await
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<ResponseStream> {
        let mut request = request;
        request.stream = true;

        let openai_request = self.to_openai_request(&request);

        let response = self
            .add_headers(self.client.post(self.completions_url()))
            .json(&openai_request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        Ok(parse_openai_sse_stream(response.bytes_stream()))
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn health_check(&self) -> Result<()> {
        let model = self
            .config
            .model
            .clone()
            .unwrap_or_else(|| "gpt-3.5-turbo".to_string());
        let request = CompletionRequest::new(model, vec![Message::user("ping")], 1);

        match self.complete(request).await {
            Ok(_) | Err(LlmError::RateLimit(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI API Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a Vec<String>>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiChatResponse {
    id: String,
    choices: Vec<OpenAiChoice>,
    model: String,
    usage: Option<OpenAiUsage>,
}

impl From<OpenAiChatResponse> for CompletionResponse {
    fn from(resp: OpenAiChatResponse) -> Self {
        let (content, stop_reason) = match resp.choices.into_iter().next() {
            Some(choice) => (
                choice.message.content.unwrap_or_default(),
                choice
                    .finish_reason
                    .as_deref()
                    .map(StopReason::from_finish_reason)
                    .unwrap_or(StopReason::EndTurn),
            ),
            None => (String::new(), StopReason::EndTurn),
        };

        let usage = resp
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        CompletionResponse::new(resp.id, resp.model, content, stop_reason, usage)
    }
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiError,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiError {
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE Streaming
// ─────────────────────────────────────────────────────────────────────────────

fn parse_openai_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> ResponseStream {
    Box::pin(futures::stream::unfold(
        OpenAiSseState {
            byte_stream: Box::pin(byte_stream),
            buffer: String::new(),
            done: false,
            started: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }

            loop {
                while let Some(line_end) = state.buffer.find('\n') {
                    let line = state.buffer[..line_end].trim().to_string();
                    state.buffer.drain(..=line_end);

                    if let Some(event) = state.parse_line(&line) {
                        return Some((Ok(event), state));
                    }
                }

                match state.byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(LlmError::Network(e.to_string())), state));
                    }
                    None => return None,
                }
            }
        },
    ))
}

struct OpenAiSseState {
    byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: String,
    done: bool,
    started: bool,
}

impl OpenAiSseState {
    /// Translate one SSE line into at most one event.
    ///
    /// The first chunk only produces `MessageStart`; any text it carries is
    /// re-queued so it is not lost.
    fn parse_line(&mut self, line: &str) -> Option<StreamEvent> {
        let data = line.strip_prefix("data:")?.trim();

        if data == "[DONE]" {
            self.done = true;
            return Some(StreamEvent::MessageStop);
        }

        let chunk: OpenAiStreamChunk = serde_json::from_str(data).ok()?;

        if !self.started {
            self.started = true;
            if let Some(content) = chunk
                .choices
                .first()
                .and_then(|c| c.delta.as_ref())
                .and_then(|d| d.content.as_ref())
                .filter(|c| !c.is_empty())
            {
                let requeued = serde_json::json!({
                    "id": chunk.id,
                    "model": chunk.model,
                    "choices": [{ "delta": { "content": content } }],
                });
                self.buffer.insert_str(0, &format!("data: {}\n", requeued));
            }
            return Some(StreamEvent::MessageStart {
                id: chunk.id,
                model: chunk.model,
            });
        }

        let choice = chunk.choices.into_iter().next()?;

        if let Some(text) = choice.delta.and_then(|d| d.content)
            && !text.is_empty()
        {
            return Some(StreamEvent::TextDelta { text });
        }

        let usage = chunk
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        choice.finish_reason.map(|reason| StreamEvent::MessageDelta {
            stop_reason: StopReason::from_finish_reason(&reason),
            usage,
        })
    }
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiStreamChoice {
    delta: Option<OpenAiStreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
