//! Chat completion client: single-shot and streamed.
//!
//! [`ChatModel`] is the seam the orchestrator depends on; [`OpenAIChat`]
//! implements it against `POST {base_url}/chat/completions`.
//!
//! # Streaming protocol
//!
//! With `stream: true` the provider answers with Server-Sent Events:
//!
//! ```text
//! data: {"choices":[{"delta":{"role":"assistant"}}]}
//!
//! data: {"choices":[{"delta":{"content":"Transaction"}}]}
//!
//! data: [DONE]
//! ```
//!
//! Network chunks do not respect line boundaries, so [`SseDecoder`] buffers
//! bytes until a full line is available. Every non-empty `delta.content` is
//! forwarded immediately; `[DONE]` ends the stream.
//!
//! Only connection setup is retried. Once the body is being read, any
//! failure is yielded as a single [`RagError::MidStream`] and the stream
//! ends, because the caller already holds part of the answer.

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{RagError, Result, Upstream};
use crate::openai::OpenAITransport;
use crate::stream::FragmentStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A role-tagged unit of prompt text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
    /// `None` leaves the cap to the provider.
    pub max_output_tokens: Option<u32>,
    /// Prompt-prefix caching hint. Has no effect on the answer.
    pub cache_prefix_key: Option<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_output_tokens: None,
            cache_prefix_key: None,
        }
    }
}

impl CompletionOptions {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            model: config.chat_model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            cache_prefix_key: None,
        }
    }

    pub fn with_cache_prefix_key(mut self, key: impl Into<String>) -> Self {
        self.cache_prefix_key = Some(key.into());
        self
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a whole answer in one response.
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions)
        -> Result<String>;

    /// Open a streamed completion. Returns once the provider has accepted
    /// the request; fragments arrive through the returned stream.
    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<FragmentStream>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_cache_key: Option<&'a str>,
}

/// Build the JSON body for `chat/completions`.
pub fn build_request_body(
    messages: &[ChatMessage],
    options: &CompletionOptions,
    stream: bool,
) -> Result<Value> {
    let request = ChatRequest {
        model: &options.model,
        messages,
        temperature: options.temperature,
        max_tokens: options.max_output_tokens,
        stream,
        prompt_cache_key: options.cache_prefix_key.as_deref(),
    };
    Ok(serde_json::to_value(request)?)
}

// ============ OpenAI Chat ============

pub struct OpenAIChat {
    transport: OpenAITransport,
    idle_timeout: Duration,
}

impl OpenAIChat {
    pub fn new(transport: OpenAITransport, config: &ProviderConfig) -> Self {
        Self {
            transport,
            idle_timeout: config.stream_idle_timeout(),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String> {
        let body = build_request_body(messages, options, false)?;
        let response = self
            .transport
            .post_json("chat/completions", &body, Upstream::Completion)
            .await?;
        parse_completion(&response)
    }

    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<FragmentStream> {
        let body = build_request_body(messages, options, true)?;
        let response = self
            .transport
            .open_stream("chat/completions", &body, Upstream::Completion)
            .await?;

        debug!(model = %options.model, "completion stream opened");

        let cancel = CancellationToken::new();
        let fragments = sse_fragments(response.bytes_stream(), cancel.clone(), self.idle_timeout);
        Ok(FragmentStream::new(fragments, cancel))
    }
}

/// Extract `choices[0].message.content` from a non-streamed response.
/// A `null` content (e.g. a refusal) is returned as an empty string.
pub fn parse_completion(json: &Value) -> Result<String> {
    let message = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| {
            RagError::terminal(
                Upstream::Completion,
                None,
                "Invalid completion response: missing choices[0].message",
            )
        })?;

    Ok(message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string())
}

// ============ SSE decoding ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Incremental line decoder for `text/event-stream` bodies.
///
/// Splits on `\n` at the byte level, so multi-byte UTF-8 sequences cut by
/// a chunk boundary are reassembled before decoding. Only `data:` fields
/// are reported; comments, `event:`/`id:` fields and blank lines are
/// skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(&['\n', '\r'][..]);

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.strip_prefix(' ').unwrap_or(data);
                if data == "[DONE]" {
                    events.push(SseEvent::Done);
                } else if !data.is_empty() {
                    events.push(SseEvent::Data(data.to_string()));
                }
            }
        }
        events
    }

    /// Bytes received after the last complete line.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Decode one `data:` payload into an optional text delta.
pub fn parse_delta(payload: &str) -> Result<Option<String>> {
    let json: Value = serde_json::from_str(payload)
        .map_err(|e| RagError::mid_stream(format!("malformed stream event: {}", e)))?;

    if let Some(err) = json.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("provider reported an error");
        return Err(RagError::mid_stream(message.to_string()));
    }

    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    Ok(content)
}

/// Turn a raw SSE byte stream into answer fragments.
///
/// Ends cleanly on `[DONE]` or cancellation. A transport error, an idle gap
/// longer than `idle_timeout`, a provider error event, or EOF without
/// `[DONE]` yields one `MidStream` error and ends the stream.
pub fn sse_fragments<S, B, E>(
    bytes: S,
    cancel: CancellationToken,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut decoder = SseDecoder::default();
        let mut delivered = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(delivered, "completion stream cancelled by caller");
                    return;
                }
                next = tokio::time::timeout(idle_timeout, bytes.next()) => next,
            };

            let chunk = match next {
                Err(_) => {
                    yield Err(RagError::mid_stream(format!(
                        "no data from provider for {}s",
                        idle_timeout.as_secs_f32()
                    )));
                    return;
                }
                Ok(None) => {
                    yield Err(RagError::mid_stream(
                        "provider closed the stream before the completion signal",
                    ));
                    return;
                }
                Ok(Some(Err(e))) => {
                    yield Err(RagError::mid_stream(format!("transport failure: {}", e)));
                    return;
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            for event in decoder.push(chunk.as_ref()) {
                match event {
                    SseEvent::Done => {
                        debug!(delivered, "completion stream finished");
                        return;
                    }
                    SseEvent::Data(payload) => match parse_delta(&payload) {
                        Ok(Some(text)) => {
                            delivered += 1;
                            yield Ok(text);
                        }
                        Ok(None) => {}
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    },
                }
            }
        }
    }
}
