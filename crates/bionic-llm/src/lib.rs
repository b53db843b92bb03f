//! Bionic LLM - OpenAI-compatible generation client with streaming and retry

pub mod openai;
pub mod provider;
pub mod retry;
pub mod types;

pub use openai::OpenAiProvider;
pub use provider::{GenerationClient, LlmError, LlmResult, LlmStream};
pub use retry::RetryPolicy;
pub use tokio_util::sync::CancellationToken;
pub use types::*;
