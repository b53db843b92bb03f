//! Generation client trait

use crate::types::{ChatRequest, ChatResponse, StreamDelta};
use futures::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// LLM error types
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {status}: {message}")]
    RequestFailed { status: u16, message: String },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl LlmError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed { status, .. } => matches!(status, 408 | 500 | 502 | 503 | 504),
            Self::RateLimited { .. } | Self::StreamError(_) => true,
            Self::NetworkError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::AuthFailed(_) | Self::InvalidResponse(_) | Self::Cancelled => false,
        }
    }

    /// Server-requested wait before the next attempt.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// Stream type for LLM responses
pub type LlmStream = Pin<Box<dyn Stream<Item = LlmResult<StreamDelta>> + Send>>;

/// A chat-completion backend.
#[async_trait::async_trait]
pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;

    /// Stream a completion. When `cancel` fires the HTTP connection is dropped
    /// and the stream yields `LlmError::Cancelled`.
    async fn complete_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> LlmResult<LlmStream>;

    /// Non-streaming completion, used for tool selection.
    async fn complete(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> LlmResult<ChatResponse>;
}
