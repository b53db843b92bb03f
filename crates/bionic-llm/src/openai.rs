//! OpenAI-compatible chat-completion provider with SSE streaming

use crate::provider::{GenerationClient, LlmError, LlmResult, LlmStream};
use crate::types::{ChatRequest, ChatResponse, FunctionCall, StreamDelta, WireToolCall};
use bionic_core::config::ModelConfig;
use bionic_core::TokenUsage;
use futures::StreamExt;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const DEFAULT_RATE_LIMIT_WAIT_MS: u64 = 1_000;

pub struct OpenAiProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: None,
            base_url: base_url.into(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Provider for a configured model, reading its API key from the environment.
    pub fn from_model(model: &ModelConfig) -> Self {
        let provider = Self::new(model.base_url.clone());
        match model.api_key() {
            Some(key) => provider.with_api_key(key),
            None => provider,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn send(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> LlmResult<reqwest::Response> {
        debug!(
            "chat request: model={} stream={} messages={}",
            request.model,
            request.stream,
            request.messages.len()
        );

        let mut builder = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json")
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            r = builder.send() => r?,
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after_ms(response.headers());
            let error_text = response.text().await.unwrap_or_default();
            error!("chat completion error {}: {}", status, error_text);
            return Err(error_for_status(status.as_u16(), error_text, retry_after));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl GenerationClient for OpenAiProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete_stream(
        &self,
        mut request: ChatRequest,
        cancel: CancellationToken,
    ) -> LlmResult<LlmStream> {
        request.stream = true;
        let response = self.send(&request, &cancel).await?;
        let stream = parse_sse_stream(response.bytes_stream(), cancel);
        Ok(Box::pin(stream))
    }

    async fn complete(
        &self,
        mut request: ChatRequest,
        cancel: CancellationToken,
    ) -> LlmResult<ChatResponse> {
        request.stream = false;
        let response = self.send(&request, &cancel).await?;
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            b = response.text() => b?,
        };
        parse_completion(&body)
    }
}

fn error_for_status(status: u16, message: String, retry_after_ms: Option<u64>) -> LlmError {
    match status {
        401 | 403 => LlmError::AuthFailed(message),
        429 => LlmError::RateLimited {
            retry_after_ms: retry_after_ms.unwrap_or(DEFAULT_RATE_LIMIT_WAIT_MS),
        },
        _ => LlmError::RequestFailed { status, message },
    }
}

fn parse_retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    value.parse::<u64>().ok().map(|s| s.saturating_mul(1000))
}

fn parse_completion(body: &str) -> LlmResult<ChatResponse> {
    let completion: Completion = serde_json::from_str(body)
        .map_err(|e| LlmError::InvalidResponse(format!("{}: {}", e, truncate(body, 200))))?;
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0]".into()))?;
    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        reasoning: choice.message.reasoning_content.unwrap_or_default(),
        tool_calls: choice.message.tool_calls.unwrap_or_default(),
        function_call: choice.message.function_call,
        usage: completion.usage.unwrap_or_default(),
        finish_reason: choice.finish_reason,
    })
}

fn parse_sse_stream(
    bytes_stream: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = LlmResult<StreamDelta>> + Send {
    async_stream::stream! {
        let mut buffer: Vec<u8> = Vec::new();
        let mut finish_reason: Option<String> = None;
        let mut done = false;

        tokio::pin!(bytes_stream);

        while !done {
            let chunk_result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    yield Err(LlmError::Cancelled);
                    return;
                }
                next = bytes_stream.next() => match next {
                    Some(r) => r,
                    None => break,
                },
            };

            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    yield Err(LlmError::StreamError(e.to_string()));
                    return;
                }
            };

            buffer.extend_from_slice(&chunk);

            // Events are split on raw bytes so a character straddling two
            // chunks is only decoded once it is complete.
            while let Some((event_end, sep_len)) = find_event_end(&buffer) {
                let event: Vec<u8> = buffer.drain(..event_end + sep_len).collect();
                let event_str = decode_event(&event[..event_end]);

                for delta in parse_sse_event(&event_str, &mut finish_reason, &mut done) {
                    yield delta;
                }
                if done {
                    break;
                }
            }
        }

        let rest = decode_event(&buffer);
        if !done && !rest.trim().is_empty() {
            for delta in parse_sse_event(&rest, &mut finish_reason, &mut done) {
                yield delta;
            }
        }

        yield Ok(StreamDelta::Done { finish_reason });
    }
}

/// Offset and length of the first blank-line separator, `\n\n` or `\r\n\r\n`.
fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
        (a, b) => a.or(b),
    }
}

/// A complete event is whole UTF-8 unless the server sent garbage, which is
/// replaced rather than failing the stream.
fn decode_event(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(e) => {
            debug!("stream event is not valid UTF-8: {}", e);
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Deltas carried by one SSE event. Sets `done` on the `[DONE]` sentinel.
fn parse_sse_event(
    event_str: &str,
    finish_reason: &mut Option<String>,
    done: &mut bool,
) -> Vec<LlmResult<StreamDelta>> {
    let mut out = Vec::new();
    for line in event_str.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            *done = true;
            break;
        }

        let chunk: CompletionChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                if let Ok(err) = serde_json::from_str::<ErrorEvent>(data) {
                    out.push(Err(LlmError::StreamError(err.error.message)));
                } else {
                    debug!("skipping unparseable stream event: {}", e);
                }
                continue;
            }
        };

        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(reasoning) = choice.delta.reasoning_content.filter(|r| !r.is_empty()) {
                out.push(Ok(StreamDelta::Reasoning(reasoning)));
            }
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                out.push(Ok(StreamDelta::Text(text)));
            }
            if choice.finish_reason.is_some() {
                *finish_reason = choice.finish_reason;
            }
        }
        if let Some(usage) = chunk.usage.filter(|u| u.total_tokens > 0) {
            out.push(Ok(StreamDelta::Usage(usage)));
        }
    }
    out
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[derive(Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}
