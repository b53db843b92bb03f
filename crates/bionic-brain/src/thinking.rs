//! Thinking engine - one logical brain over a generation backend
//!
//! Three call shapes share one implementation regardless of which brain
//! (left, right, consciousness) an instance plays:
//!
//! - `classify`: streamed, reasoning split off, structured result extracted
//! - `propose_tool_calls`: non-streaming, tool catalog attached
//! - `continue_after_tool_results`: replays the calls and their outcomes
//!
//! The event sink and cancellation token travel with each call in a
//! [`TurnContext`], so concurrent requests sharing an engine never see each
//! other's events.

use crate::budget::TokenBudgetManager;
use crate::context::estimate_tokens;
use crate::extract::{extract_json, ReasoningSplitter, Segment};
use crate::prompt;
use bionic_core::config::{ModelConfig, TokenBudgetConfig};
use bionic_core::{
    DialogueMessage, Error, EventSink, Result, Role, ThinkingEvent, ThinkingResult, TokenUsage,
    TokenUsageRecord, TokenUsageRepository, ToolCallItem, ToolCallResult, ToolExecResult,
    ToolSchema,
};
use bionic_llm::{
    ChatMessage, ChatRequest, ChatResponse, ChatTool, CancellationToken, FunctionCall,
    GenerationClient, LlmError, ResponseFormat, RetryPolicy, StreamDelta, StreamOptions,
    WireToolCall,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Answer given when a tool-selection round is asked to pick from nothing.
pub const NO_TOOLS_ANSWER: &str = "No matching tool is available for this request.";

/// Per-request state handed to every backend call.
#[derive(Clone, Debug, Default)]
pub struct TurnContext {
    pub session_id: String,
    pub events: EventSink,
    pub cancel: CancellationToken,
}

impl TurnContext {
    pub fn new(events: EventSink, cancel: CancellationToken) -> Self {
        Self {
            session_id: events.session_id().unwrap_or_default().to_string(),
            events,
            cancel,
        }
    }

    /// No subscriber, never cancelled.
    pub fn detached() -> Self {
        Self::default()
    }
}

/// Inputs of one classification pass.
#[derive(Clone, Copy, Debug)]
pub struct ClassifyInput<'a> {
    pub question: &'a str,
    pub history: &'a [DialogueMessage],
    /// Memory references appended to the system prompt.
    pub references: &'a str,
    /// Request a JSON object and parse it into a [`ThinkingResult`].
    pub structured: bool,
    /// Current skill catalog keywords, used as a can_answer hint.
    pub skill_keywords: &'a [String],
}

impl<'a> ClassifyInput<'a> {
    pub fn new(question: &'a str) -> Self {
        Self {
            question,
            history: &[],
            references: "",
            structured: true,
            skill_keywords: &[],
        }
    }

    pub fn with_history(mut self, history: &'a [DialogueMessage]) -> Self {
        self.history = history;
        self
    }

    pub fn with_references(mut self, references: &'a str) -> Self {
        self.references = references;
        self
    }

    pub fn with_skill_keywords(mut self, keywords: &'a [String]) -> Self {
        self.skill_keywords = keywords;
        self
    }

    /// Free-text answer instead of a JSON object.
    pub fn unstructured(mut self) -> Self {
        self.structured = false;
        self
    }
}

pub struct Thinking {
    label: String,
    model: ModelConfig,
    prompt: String,
    client: Arc<dyn GenerationClient>,
    budget: TokenBudgetManager,
    retry: RetryPolicy,
    usage_repo: Option<Arc<dyn TokenUsageRepository>>,
}

impl Thinking {
    pub fn new(
        label: impl Into<String>,
        model: ModelConfig,
        prompt: impl Into<String>,
        client: Arc<dyn GenerationClient>,
        budget: TokenBudgetConfig,
    ) -> Self {
        let budget = TokenBudgetManager::new(model.context_tokens, budget);
        Self {
            label: label.into(),
            model,
            prompt: prompt.into(),
            client,
            budget,
            retry: RetryPolicy::default(),
            usage_repo: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_usage_repository(mut self, repo: Option<Arc<dyn TokenUsageRepository>>) -> Self {
        self.usage_repo = repo;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    pub fn system_prompt(&self) -> &str {
        &self.prompt
    }

    pub fn budget(&self) -> &TokenBudgetManager {
        &self.budget
    }

    /// History rounds that fit this engine's context window right now.
    pub fn max_history_rounds(&self) -> usize {
        self.budget
            .dynamic_max_rounds(estimate_tokens(&self.prompt) as u32)
    }

    /// Streamed classification. Malformed output never fails the call: it
    /// degrades to a result answering with the raw text.
    pub async fn classify(&self, input: ClassifyInput<'_>, turn: &TurnContext) -> Result<ThinkingResult> {
        debug!("[{}] classify with model {}", self.label, self.model.name);

        let mut system = prompt::with_skill_keywords(&self.prompt, input.skill_keywords);
        if !input.references.is_empty() {
            system.push('\n');
            system.push_str(input.references);
        }
        let shape = CallShape {
            system_prompt_tokens: estimate_tokens(&system) as u32,
            history_rounds: count_rounds(input.history),
        };

        let mut messages = Vec::with_capacity(input.history.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(input.history.iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(input.question));

        let mut request = self.base_request(messages);
        request.stream = true;
        request.stream_options = Some(StreamOptions {
            include_usage: true,
        });
        if input.structured {
            request.response_format = Some(ResponseFormat::json_object());
        }
        request.chat_template_kwargs = Some(serde_json::json!({"enable_thinking": true}));

        turn.events.start(format!("{} thinking", self.label));
        let started = Instant::now();

        let mut stream = self
            .retry
            .run(&turn.cancel, || {
                self.client
                    .complete_stream(request.clone(), turn.cancel.clone())
            })
            .await
            .map_err(|e| self.backend_error(e, turn))?;

        let mut splitter = ReasoningSplitter::new();
        let mut reasoning_field = String::new();
        let mut full = String::new();
        let mut usage = TokenUsage::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = turn.cancel.cancelled() => {
                    debug!("[{}] classify stream cancelled", self.label);
                    return Err(Error::Cancelled);
                }
                next = stream.next() => next,
            };
            match next {
                Some(Ok(StreamDelta::Text(text))) => {
                    full.push_str(&text);
                    for segment in splitter.push(&text) {
                        emit_segment(&turn.events, segment);
                    }
                }
                Some(Ok(StreamDelta::Reasoning(text))) => {
                    reasoning_field.push_str(&text);
                    emit_segment(&turn.events, Segment::Reasoning(text));
                }
                Some(Ok(StreamDelta::Usage(u))) => usage = u,
                Some(Ok(StreamDelta::Done { .. })) | None => break,
                Some(Err(e)) => return Err(self.backend_error(e, turn)),
            }
        }
        for segment in splitter.finish() {
            emit_segment(&turn.events, segment);
        }

        let reasoning = logged_reasoning(&reasoning_field, splitter.reasoning());
        if !reasoning.is_empty() {
            debug!("[{}] reasoning: {}", self.label, reasoning);
        }

        let visible = splitter.visible().trim();
        let target = if visible.is_empty() { full.trim() } else { visible };
        let result = if input.structured {
            parse_thinking_result(target)
        } else {
            ThinkingResult::from_raw_text(target)
        };

        info!(
            intent = %result.intent,
            keywords = ?result.keywords,
            useless = result.useless,
            can_answer = result.can_answer,
            "[{}] classify complete",
            self.label
        );

        self.record_usage(usage, shape, started);
        turn.events.complete(result.answer.clone());
        Ok(result)
    }

    /// Ask the backend to pick tools or answer directly.
    pub async fn propose_tool_calls(
        &self,
        question: &str,
        history: &[DialogueMessage],
        tools: &[ToolSchema],
        system_prompt_override: Option<&str>,
        turn: &TurnContext,
    ) -> Result<ToolCallResult> {
        info!(
            tools = tools.len(),
            "[{}] selecting tools for: {}", self.label, question
        );
        turn.events.start(format!("{} selecting tools", self.label));

        if tools.is_empty() {
            warn!("[{}] tool selection with an empty catalog", self.label);
            return Ok(ToolCallResult::Answer(NO_TOOLS_ANSWER.to_string()));
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(prompt::tool_selection_prompt(
            system_prompt_override,
        )));
        messages.extend(history.iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(question));

        let response = self.complete_with_tools(messages, tools, turn).await?;
        parse_tool_selection(response)
    }

    /// Replay the executed calls with their outcomes so the backend can
    /// answer or chain further calls.
    pub async fn continue_after_tool_results(
        &self,
        results: &[ToolExecResult],
        history: &[DialogueMessage],
        tools: &[ToolSchema],
        question: &str,
        turn: &TurnContext,
    ) -> Result<ToolCallResult> {
        debug!(
            "[{}] returning {} tool results to the backend",
            self.label,
            results.len()
        );

        let mut messages = Vec::with_capacity(history.len() + results.len() + 3);
        messages.push(ChatMessage::system(prompt::tool_selection_prompt(None)));
        messages.extend(history.iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(question));

        let mut calls = Vec::with_capacity(results.len());
        for r in results {
            let arguments = serde_json::to_string(&r.arguments)?;
            calls.push(WireToolCall::new(r.id.clone(), r.name.clone(), arguments));
        }
        messages.push(ChatMessage::assistant_tool_calls(calls));

        for r in results {
            let content = r.to_content_string();
            turn.events.emit(ThinkingEvent::tool_result(&r.name, &content));
            messages.push(ChatMessage::tool(r.id.clone(), content));
        }

        let response = self.complete_with_tools(messages, tools, turn).await?;
        parse_tool_selection(response)
    }

    async fn complete_with_tools(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolSchema],
        turn: &TurnContext,
    ) -> Result<ChatResponse> {
        let mut request = self.base_request(messages);
        request.tools = Some(tools.iter().map(ChatTool::from).collect());
        request.tool_choice = Some("auto".into());
        let shape = CallShape::of(&request.messages);

        let started = Instant::now();
        let response = self
            .retry
            .run(&turn.cancel, || {
                self.client.complete(request.clone(), turn.cancel.clone())
            })
            .await
            .map_err(|e| self.backend_error(e, turn))?;
        self.record_usage(response.usage, shape, started);
        Ok(response)
    }

    fn base_request(&self, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            model: self.model.name.clone(),
            messages,
            temperature: (self.model.temperature > 0.0).then_some(self.model.temperature),
            max_tokens: (self.model.max_output_tokens > 0).then_some(self.model.max_output_tokens),
            ..Default::default()
        }
    }

    fn backend_error(&self, e: LlmError, turn: &TurnContext) -> Error {
        match e {
            LlmError::Cancelled => Error::Cancelled,
            e => {
                warn!("[{}] backend call failed: {}", self.label, e);
                turn.events.error(e.to_string());
                Error::model(&self.model.name, e.to_string())
            }
        }
    }

    fn record_usage(&self, usage: TokenUsage, shape: CallShape, started: Instant) {
        if usage.total_tokens == 0 {
            debug!("[{}] backend reported no usage", self.label);
            return;
        }
        self.budget.record_usage(
            usage.prompt_tokens,
            usage.completion_tokens,
            shape.system_prompt_tokens,
            shape.history_rounds,
        );

        let Some(repo) = &self.usage_repo else {
            return;
        };
        let record = TokenUsageRecord {
            model: self.model.name.clone(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            duration_ms: started.elapsed().as_millis() as u64,
            created_at: chrono::Utc::now(),
        };
        if let Err(e) = repo.save(&record) {
            warn!("[{}] failed to save token usage: {}", self.label, e);
        }
    }
}

/// What one backend call sent, for spreading its usage over rounds.
#[derive(Clone, Copy, Debug, PartialEq)]
struct CallShape {
    system_prompt_tokens: u32,
    history_rounds: usize,
}

impl CallShape {
    /// The leading system message is the prompt; every user message before
    /// the last one is a history round.
    fn of(messages: &[ChatMessage]) -> Self {
        let system_prompt_tokens = messages
            .first()
            .filter(|m| m.role == "system")
            .and_then(|m| m.content.as_deref())
            .map(|c| estimate_tokens(c) as u32)
            .unwrap_or(0);
        let users = messages.iter().filter(|m| m.role == "user").count();
        Self {
            system_prompt_tokens,
            history_rounds: users.saturating_sub(1),
        }
    }
}

/// Reasoning from the dedicated stream field followed by any inline
/// `<think>` block.
fn logged_reasoning(field: &str, inline: &str) -> String {
    [field.trim(), inline.trim()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}

fn emit_segment(events: &EventSink, segment: Segment) {
    match segment {
        Segment::Reasoning(text) | Segment::Visible(text) => events.chunk(text),
    }
}

fn count_rounds(history: &[DialogueMessage]) -> usize {
    history.iter().filter(|m| m.role == Role::User).count()
}

/// Parse a classification reply, degrading to a raw-text answer.
pub fn parse_thinking_result(content: &str) -> ThinkingResult {
    match serde_json::from_str::<ThinkingResult>(extract_json(content)) {
        Ok(result) => result,
        Err(e) => {
            warn!("classify output is not a result object ({}), answering with raw text", e);
            ThinkingResult::from_raw_text(content)
        }
    }
}

/// `{name, arguments}` object some backends emit as plain text.
#[derive(Deserialize)]
struct TextualCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Interpret a tool-selection response. Malformed arguments on an explicit
/// call are fatal; executing a guess could do the wrong thing.
pub fn parse_tool_selection(response: ChatResponse) -> Result<ToolCallResult> {
    if !response.tool_calls.is_empty() {
        let calls = response
            .tool_calls
            .into_iter()
            .map(|call| to_call_item(call.id, call.function))
            .collect::<Result<Vec<_>>>()?;
        return Ok(ToolCallResult::Calls(calls));
    }

    if let Some(function) = response.function_call {
        return Ok(ToolCallResult::Calls(vec![to_call_item(String::new(), function)?]));
    }

    let content = response.content.trim();
    if content.is_empty() {
        return Ok(ToolCallResult::Answer(String::new()));
    }

    if let Ok(call) = serde_json::from_str::<TextualCall>(extract_json(content)) {
        if !call.name.is_empty() {
            let arguments = match call.arguments {
                Value::Object(map) => map,
                Value::String(s) => parse_arguments(&call.name, &s)?,
                Value::Null => Map::new(),
                other => {
                    return Err(Error::Parse(format!(
                        "arguments for {} are not an object: {}",
                        call.name, other
                    )))
                }
            };
            debug!("textual tool call detected: {}", call.name);
            return Ok(ToolCallResult::Calls(vec![ToolCallItem {
                id: generate_call_id(),
                name: call.name,
                arguments,
            }]));
        }
    }

    Ok(ToolCallResult::Answer(content.to_string()))
}

fn to_call_item(id: String, function: FunctionCall) -> Result<ToolCallItem> {
    let arguments = parse_arguments(&function.name, &function.arguments)?;
    Ok(ToolCallItem {
        id: if id.is_empty() { generate_call_id() } else { id },
        name: function.name,
        arguments,
    })
}

fn parse_arguments(name: &str, raw: &str) -> Result<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(raw)
        .map_err(|e| Error::Parse(format!("invalid arguments for {}: {}", name, e)))
}

fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content: &str) -> ChatResponse {
        ChatResponse {
            content: content.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_result_fallbacks() {
        let r = parse_thinking_result("I am not JSON");
        assert_eq!(r.answer, "I am not JSON");
        assert!(r.can_answer);

        let r = parse_thinking_result("{\"answer\": \"x\"");
        assert!(r.can_answer);
        assert_eq!(r.answer, "{\"answer\": \"x\"");

        let r = parse_thinking_result("```json\n{\"answer\":\"ok\",\"can_answer\":true}\n```");
        assert_eq!(r.answer, "ok");
    }

    #[test]
    fn test_tool_selection_native_calls() {
        let resp = ChatResponse {
            tool_calls: vec![
                WireToolCall::new("c1", "weather", r#"{"city":"Oslo"}"#),
                WireToolCall::new("", "time", ""),
            ],
            ..Default::default()
        };
        let ToolCallResult::Calls(calls) = parse_tool_selection(resp).unwrap() else {
            panic!("expected calls");
        };
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].arguments["city"], "Oslo");
        assert!(calls[1].id.starts_with("call_"));
        assert!(calls[1].arguments.is_empty());
    }

    #[test]
    fn test_tool_selection_bad_arguments_fatal() {
        let resp = ChatResponse {
            tool_calls: vec![WireToolCall::new("c1", "weather", "{city:")],
            ..Default::default()
        };
        assert!(matches!(parse_tool_selection(resp), Err(Error::Parse(_))));
    }

    #[test]
    fn test_tool_selection_legacy_function_call() {
        let resp = ChatResponse {
            function_call: Some(FunctionCall {
                name: "ping".into(),
                arguments: r#"{"host":"a"}"#.into(),
            }),
            ..Default::default()
        };
        let ToolCallResult::Calls(calls) = parse_tool_selection(resp).unwrap() else {
            panic!("expected calls");
        };
        assert_eq!(calls[0].name, "ping");
    }

    #[test]
    fn test_tool_selection_textual_call() {
        let resp = response(r#"{"name":"weather","arguments":{"city":"Rome"}}"#);
        let ToolCallResult::Calls(calls) = parse_tool_selection(resp).unwrap() else {
            panic!("expected calls");
        };
        assert_eq!(calls[0].arguments["city"], "Rome");

        let resp = response(r#"{"name":"weather","arguments":"{\"city\":\"Rome\"}"}"#);
        assert!(!parse_tool_selection(resp).unwrap().no_call());
    }

    #[test]
    fn test_tool_selection_plain_answer() {
        assert_eq!(
            parse_tool_selection(response("  It is sunny.  ")).unwrap(),
            ToolCallResult::Answer("It is sunny.".into())
        );
        assert_eq!(
            parse_tool_selection(response("")).unwrap(),
            ToolCallResult::Answer(String::new())
        );
        // JSON without a name is an answer, not a call
        assert!(parse_tool_selection(response(r#"{"result": 3}"#))
            .unwrap()
            .no_call());
    }

    #[test]
    fn test_call_shape_counts_history_rounds() {
        let messages = vec![
            ChatMessage::system("x".repeat(40)),
            ChatMessage::user("earlier"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("now"),
            ChatMessage::tool("c1", "result"),
        ];
        let shape = CallShape::of(&messages);
        assert_eq!(shape.history_rounds, 1);
        assert_eq!(shape.system_prompt_tokens, estimate_tokens(&"x".repeat(40)) as u32);

        let bare = CallShape::of(&[ChatMessage::user("now")]);
        assert_eq!(
            bare,
            CallShape {
                system_prompt_tokens: 0,
                history_rounds: 0
            }
        );
    }

    #[test]
    fn test_logged_reasoning_joins_both_sources() {
        assert_eq!(logged_reasoning(" field ", ""), "field");
        assert_eq!(logged_reasoning("", "inline"), "inline");
        assert_eq!(logged_reasoning("field", "inline"), "field\ninline");
        assert!(logged_reasoning("  ", "").is_empty());
    }

    #[test]
    fn test_classify_input_builder() {
        let history = vec![DialogueMessage::user("hi"), DialogueMessage::assistant("hello")];
        let input = ClassifyInput::new("q").with_history(&history).unstructured();
        assert!(!input.structured);
        assert_eq!(count_rounds(input.history), 1);
    }
}
