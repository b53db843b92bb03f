//! Response assembly

use bionic_core::{ScheduleSpec, ThinkingResponse, ThinkingResult, ToolSchema};

/// Answer taken straight from a classification result.
pub fn from_thinking(result: &ThinkingResult) -> ThinkingResponse {
    ThinkingResponse {
        answer: result.answer.clone(),
        tools: Vec::new(),
        send_to: result.send_to.clone(),
        schedule: None,
    }
}

/// Answer produced by a tool-calling or escalation stage.
pub fn from_tools(answer: impl Into<String>, tools: &[ToolSchema], send_to: Option<String>) -> ThinkingResponse {
    ThinkingResponse {
        answer: answer.into(),
        tools: tools.to_vec(),
        send_to,
        schedule: None,
    }
}

/// Plain answer with no tools or forwarding.
pub fn plain(answer: impl Into<String>) -> ThinkingResponse {
    from_tools(answer, &[], None)
}

/// Confirmation for a schedule request, echoing the created schedule.
pub fn scheduled(answer: impl Into<String>, schedule: Option<ScheduleSpec>, send_to: Option<String>) -> ThinkingResponse {
    ThinkingResponse {
        answer: answer.into(),
        tools: Vec::new(),
        send_to,
        schedule,
    }
}
