//! Tool-call orchestration: select, execute, feed back, repeat

use crate::thinking::{Thinking, TurnContext};
use bionic_core::{
    DialogueMessage, Error, Result, SkillRegistry, ThinkingEvent, ToolCallItem, ToolCallResult,
    ToolExecResult, ToolSchema,
};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_TOOL_CALLS: usize = 10;

/// Drives a brain through bounded rounds of tool calls until it answers.
pub struct ToolCaller {
    skills: Arc<dyn SkillRegistry>,
    max_calls: usize,
}

impl ToolCaller {
    pub fn new(skills: Arc<dyn SkillRegistry>, max_calls: usize) -> Self {
        Self {
            skills,
            max_calls: max_calls.max(1),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    /// Answer `question` using `tools`. The call ceiling spans all rounds;
    /// when it cuts the exchange short the answer is empty.
    pub async fn run(
        &self,
        brain: &Thinking,
        question: &str,
        history: &[DialogueMessage],
        tools: &[ToolSchema],
        system_prompt: Option<&str>,
        turn: &TurnContext,
    ) -> Result<String> {
        let mut pending = match brain
            .propose_tool_calls(question, history, tools, system_prompt, turn)
            .await?
        {
            ToolCallResult::Answer(answer) => {
                debug!("[{}] answered without tools", brain.label());
                return Ok(answer);
            }
            ToolCallResult::Calls(calls) => calls,
        };

        let mut executed = 0usize;

        loop {
            let remaining = self.max_calls - executed;
            if pending.len() > remaining {
                warn!(
                    "[{}] tool call ceiling {} reached, skipping {} of {} calls",
                    brain.label(),
                    self.max_calls,
                    pending.len() - remaining,
                    pending.len()
                );
                pending.truncate(remaining);
            }
            executed += pending.len();

            let results = self.execute_batch(&pending, turn).await?;

            match brain
                .continue_after_tool_results(&results, history, tools, question, turn)
                .await?
            {
                ToolCallResult::Answer(answer) => {
                    info!(
                        "[{}] tool orchestration finished after {} calls",
                        brain.label(),
                        executed
                    );
                    return Ok(answer);
                }
                ToolCallResult::Calls(next) => {
                    if executed >= self.max_calls {
                        warn!(
                            "[{}] tool call ceiling {} reached, backend still wants {} more",
                            brain.label(),
                            self.max_calls,
                            next.len()
                        );
                        return Ok(String::new());
                    }
                    debug!("[{}] chained tool round: {} calls", brain.label(), next.len());
                    pending = next;
                }
            }
        }
    }

    /// Execute one round. Calls run concurrently; results keep submission
    /// order, and a failing tool only fails its own entry.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCallItem],
        turn: &TurnContext,
    ) -> Result<Vec<ToolExecResult>> {
        for call in calls {
            turn.events
                .emit(ThinkingEvent::tool_call(&call.name, &call.arguments));
        }

        let executions = calls.iter().map(|call| self.execute_one(call));
        tokio::select! {
            biased;
            _ = turn.cancel.cancelled() => Err(Error::Cancelled),
            results = join_all(executions) => Ok(results),
        }
    }

    async fn execute_one(&self, call: &ToolCallItem) -> ToolExecResult {
        info!(tool = %call.name, id = %call.id, "executing tool");
        match self.skills.execute(&call.name, &call.arguments).await {
            Ok(output) => ToolExecResult::ok(call, output),
            Err(e) => {
                warn!(tool = %call.name, "tool execution failed: {}", e);
                ToolExecResult::err(call, skill_message(e))
            }
        }
    }
}

fn skill_message(e: Error) -> String {
    match e {
        Error::Skill { message, .. } => message,
        other => other.to_string(),
    }
}
