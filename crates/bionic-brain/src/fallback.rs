//! Last-resort answer path

use crate::response;
use crate::thinking::{Thinking, TurnContext};
use crate::tool_caller::ToolCaller;
use bionic_core::{DialogueMessage, Error, Result, ThinkingResponse, ThinkingResult, ToolSchema};
use std::sync::Arc;
use tracing::{info, warn};

pub const APOLOGY: &str = "Sorry, I can't handle this request right now.";

/// Retries tool calling on the primary right brain, then apologises. The
/// answer it returns is never empty.
pub struct FallbackHandler {
    right: Arc<Thinking>,
    tool_caller: Arc<ToolCaller>,
}

impl FallbackHandler {
    pub fn new(right: Arc<Thinking>, tool_caller: Arc<ToolCaller>) -> Self {
        Self { right, tool_caller }
    }

    /// Only timeout and cancellation escape; everything else becomes an answer.
    pub async fn handle(
        &self,
        question: &str,
        classified: Option<&ThinkingResult>,
        history: &[DialogueMessage],
        searched_tools: &[ToolSchema],
        turn: &TurnContext,
    ) -> Result<ThinkingResponse> {
        info!("fallback: retrying with primary tool brain");
        let send_to = classified.and_then(|r| r.send_to.clone());

        if !searched_tools.is_empty() {
            match self
                .tool_caller
                .run(&self.right, question, history, searched_tools, None, turn)
                .await
            {
                Ok(answer) if !answer.trim().is_empty() => {
                    return Ok(response::from_tools(answer, searched_tools, send_to));
                }
                Ok(_) => warn!("fallback tool pass produced no answer"),
                Err(e @ (Error::Timeout(_) | Error::Cancelled)) => return Err(e),
                Err(e) => warn!("fallback tool pass failed: {}", e),
            }
        }

        let answer = classified
            .map(|r| r.answer.trim())
            .filter(|a| !a.is_empty())
            .unwrap_or(APOLOGY);
        Ok(ThinkingResponse {
            answer: answer.to_string(),
            tools: Vec::new(),
            send_to,
            schedule: None,
        })
    }
}
