//! Generation capability trait and implementations.
//!
//! [`LlmBackend`] is the single seam between the conversation core and any
//! model provider. Providers with a native streaming API override
//! [`LlmBackend::complete_stream`]; the default implementation performs one
//! blocking completion and chunks its text so consumers always see
//! incremental delivery.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;

use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse, StopReason, Usage};

/// Execute an async operation with retry logic.
///
/// Retries only on retryable errors (network, rate limit) with exponential
/// backoff.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    backend_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= max_retries => return Err(e),
            Err(e) => {
                attempt += 1;
                tracing::warn!(
                    backend = backend_name,
                    attempt = attempt,
                    max_retries = max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming Types
// ─────────────────────────────────────────────────────────────────────────────

/// A streaming response from an LLM backend.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send + 'static>>;

/// Events emitted during streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Message started.
    MessageStart { id: String, model: String },
    /// A fragment of generated text.
    TextDelta { text: String },
    /// Message finished with final usage stats.
    MessageDelta {
        stop_reason: StopReason,
        usage: Usage,
    },
    /// Message complete.
    MessageStop,
    /// Keep-alive.
    Ping,
    /// Provider reported an error inside the stream.
    Error { message: String },
}

impl StreamEvent {
    /// Returns true if this is the final event in a message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::MessageStop | StreamEvent::Error { .. })
    }
}

/// Split text into word-sized fragments whose concatenation is the input.
pub fn chunk_text(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(String::from)
        .collect()
}

fn response_events(response: CompletionResponse) -> Vec<Result<StreamEvent>> {
    let mut events = vec![Ok(StreamEvent::MessageStart {
        id: response.id.clone(),
        model: response.model.clone(),
    })];
    events.extend(
        chunk_text(&response.content)
            .into_iter()
            .map(|text| Ok(StreamEvent::TextDelta { text })),
    );
    events.push(Ok(StreamEvent::MessageDelta {
        stop_reason: response.stop_reason.unwrap_or(StopReason::EndTurn),
        usage: response.usage,
    }));
    events.push(Ok(StreamEvent::MessageStop));
    events
}

/// Turn a finished response into an incremental event stream.
pub fn stream_from_response(response: CompletionResponse) -> ResponseStream {
    Box::pin(futures::stream::iter(response_events(response)))
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for generation providers.
///
/// Implementations are constructed once from configuration and shared by
/// reference; switching providers means building a new instance.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Send a completion request and get a response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Send a completion request and receive incremental events.
    async fn complete_stream(&self, request: CompletionRequest) -> Result<ResponseStream> {
        let response = self.complete(request).await?;
        Ok(stream_from_response(response))
    }

    /// Get the name of this backend.
    fn name(&self) -> &str;

    /// Check if the backend is reachable.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// A shared backend that can be used across threads.
pub type SharedBackend = Arc<dyn LlmBackend>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Backend
// ─────────────────────────────────────────────────────────────────────────────

/// A scripted reply for [`MockBackend`].
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Reply with fixed text.
    Text(String),
    /// Reply with `Echo: <last user message>`.
    Echo,
    /// Fail before producing anything.
    Fail(String),
    /// Stream `partial`, then fail with `error`.
    Interrupted { partial: String, error: String },
    /// Stream `partial`, then never finish.
    Stalled { partial: String },
}

/// A mock backend for tests and offline use.
///
/// Scripted responses are consumed in order; once exhausted, the optional
/// repeating response is used, otherwise requests fail.
pub struct MockBackend {
    name: String,
    script: Mutex<VecDeque<MockResponse>>,
    repeat: Option<MockResponse>,
    latency: Option<Duration>,
    request_log: Mutex<Vec<CompletionRequest>>,
}

impl MockBackend {
    /// Create a mock backend with the given scripted responses.
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            name: "mock".to_string(),
            script: Mutex::new(responses.into()),
            repeat: None,
            latency: None,
            request_log: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock backend with a single text response.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![MockResponse::Text(text.into())])
    }

    /// A backend that echoes the last user message forever.
    pub fn echo() -> Self {
        Self::new(Vec::new()).repeating(MockResponse::Echo)
    }

    /// A backend that always fails.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(Vec::new()).repeating(MockResponse::Fail(message.into()))
    }

    /// Use `response` once the script is exhausted.
    pub fn repeating(mut self, response: MockResponse) -> Self {
        self.repeat = Some(response);
        self
    }

    /// Delay every call by `latency` before responding.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Get all requests that were made to this backend.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.request_log.lock().clone()
    }

    /// Get the number of requests made.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().len()
    }

    async fn begin(&self, request: &CompletionRequest) -> Result<MockResponse> {
        self.request_log.lock().push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let next = self.script.lock().pop_front();
        next.or_else(|| self.repeat.clone()).ok_or_else(|| {
            LlmError::Backend("MockBackend: no more responses available".to_string())
        })
    }

    fn reply(request: &CompletionRequest, text: String) -> CompletionResponse {
        let usage = Usage::estimate(request.prompt_chars(), text.chars().count());
        CompletionResponse::new(
            format!("mock_{}", uuid::Uuid::new_v4().simple()),
            request.model.clone(),
            text,
            StopReason::EndTurn,
            usage,
        )
    }

    fn echo_text(request: &CompletionRequest) -> String {
        format!("Echo: {}", request.last_user_message().unwrap_or_default())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::echo()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        match self.begin(&request).await? {
            MockResponse::Text(text) => Ok(Self::reply(&request, text)),
            MockResponse::Echo => Ok(Self::reply(&request, Self::echo_text(&request))),
            MockResponse::Fail(message) | MockResponse::Interrupted { error: message, .. } => {
                Err(LlmError::Backend(message))
            }
            MockResponse::Stalled { .. } => futures::future::pending().await,
        }
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<ResponseStream> {
        let start = |request: &CompletionRequest| -> Result<StreamEvent> {
            Ok(StreamEvent::MessageStart {
                id: "mock_stream".to_string(),
                model: request.model.clone(),
            })
        };
        let deltas = |text: &str| -> Vec<Result<StreamEvent>> {
            chunk_text(text)
                .into_iter()
                .map(|text| Ok(StreamEvent::TextDelta { text }))
                .collect()
        };

        match self.begin(&request).await? {
            MockResponse::Text(text) => Ok(stream_from_response(Self::reply(&request, text))),
            MockResponse::Echo => {
                let text = Self::echo_text(&request);
                Ok(stream_from_response(Self::reply(&request, text)))
            }
            MockResponse::Fail(message) => Err(LlmError::Backend(message)),
            MockResponse::Interrupted { partial, error } => {
                let mut events = vec![start(&request)];
                events.extend(deltas(&partial));
                events.push(Err(LlmError::Network(error)));
                Ok(Box::pin(futures::stream::iter(events)))
            }
            MockResponse::Stalled { partial } => {
                let mut events = vec![start(&request)];
                events.extend(deltas(&partial));
                Ok(Box::pin(
                    futures::stream::iter(events).chain(futures::stream::pending()),
                ))
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest::new("mock-model", vec![Message::user(text)], 100)
    }

    async fn collect_text(mut stream: ResponseStream) -> (String, Option<LlmError>) {
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(StreamEvent::TextDelta { text: t }) => text.push_str(&t),
                Ok(_) => {}
                Err(e) => return (text, Some(e)),
            }
        }
        (text, None)
    }

    #[test]
    fn test_chunk_text_roundtrips() {
        let text = "Hello there,  world\nnext line";
        let chunks = chunk_text(text);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
        assert!(chunk_text("").is_empty());
    }

    #[tokio::test]
    async fn test_mock_backend_scripted() {
        let backend = MockBackend::new(vec![
            MockResponse::Text("first".into()),
            MockResponse::Text("second".into()),
        ]);

        let r1 = backend.complete(request("a")).await.unwrap();
        let r2 = backend.complete(request("b")).await.unwrap();
        assert_eq!(r1.text(), "first");
        assert_eq!(r2.text(), "second");
        assert!(backend.complete(request("c")).await.is_err());
        assert_eq!(backend.request_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_backend_echo() {
        let backend = MockBackend::echo();
        let response = backend.complete(request("ping")).await.unwrap();
        assert_eq!(response.text(), "Echo: ping");
        assert!(!response.usage.is_empty());
    }

    #[tokio::test]
    async fn test_mock_backend_failing() {
        let backend = MockBackend::failing("down");
        let err = backend.complete(request("x")).await.unwrap_err();
        assert!(matches!(err, LlmError::Backend(ref m) if m == "down"));
    }

    #[tokio::test]
    async fn test_mock_stream_events() {
        let backend = MockBackend::with_text("one two three");
        let mut stream = backend.complete_stream(request("x")).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }

        assert!(matches!(events[0], StreamEvent::MessageStart { .. }));
        assert!(events.last().unwrap().is_terminal());
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "one two three");
    }

    #[tokio::test]
    async fn test_mock_stream_interrupted() {
        let backend = MockBackend::new(vec![MockResponse::Interrupted {
            partial: "half an".into(),
            error: "connection reset".into(),
        }]);
        let stream = backend.complete_stream(request("x")).await.unwrap();
        let (text, err) = collect_text(stream).await;
        assert_eq!(text, "half an");
        assert!(matches!(err, Some(LlmError::Network(_))));
    }

    #[tokio::test]
    async fn test_mock_stalled_never_completes() {
        let backend = MockBackend::new(vec![MockResponse::Stalled {
            partial: "wait".into(),
        }]);
        let stream = backend.complete_stream(request("x")).await.unwrap();
        let result =
            tokio::time::timeout(Duration::from_millis(50), collect_text(stream)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_default_stream_chunks_blocking_completion() {
        struct Blocking;

        #[async_trait]
        impl LlmBackend for Blocking {
            async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
                Ok(CompletionResponse::new(
                    "id",
                    "m",
                    "a b c",
                    StopReason::EndTurn,
                    Usage::new(1, 3),
                ))
            }

            fn name(&self) -> &str {
                "blocking"
            }
        }

        let stream = Blocking.complete_stream(request("x")).await.unwrap();
        let (text, err) = collect_text(stream).await;
        assert_eq!(text, "a b c");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_with_retry_retries_network_errors() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(3, Duration::from_millis(1), "test", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LlmError::Network("flaky".into()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_on_fatal_errors() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = with_retry(3, Duration::from_millis(1), "test", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Auth("nope".into()))
        })
        .await;

        assert!(matches!(result, Err(LlmError::Auth(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
