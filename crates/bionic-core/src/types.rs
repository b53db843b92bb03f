//! Core types for Bionic

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message role
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One turn of conversation history. History is owned by the caller.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DialogueMessage {
    pub role: Role,
    pub content: String,
}

impl DialogueMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// A tool's externally callable contract, supplied by the skill registry.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the arguments object.
    #[serde(default)]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            guidance: None,
            output_format: None,
        }
    }

    /// Description as presented to the backend, with guidance and output hints appended.
    pub fn full_description(&self) -> String {
        let mut description = self.description.clone();
        if let Some(guidance) = self.guidance.as_deref().filter(|g| !g.is_empty()) {
            description.push_str("\n\n## Usage\n");
            description.push_str(guidance);
        }
        if let Some(format) = self.output_format.as_deref().filter(|f| !f.is_empty()) {
            description.push_str("\n\n## Output format\n");
            description.push_str(format);
        }
        description
    }
}

/// One requested invocation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCallItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Outcome of one tool-selection round.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolCallResult {
    /// The backend answered without calling anything.
    Answer(String),
    /// The backend wants these calls executed. Never empty.
    Calls(Vec<ToolCallItem>),
}

impl ToolCallResult {
    pub fn no_call(&self) -> bool {
        matches!(self, Self::Answer(_))
    }

    pub fn answer(&self) -> Option<&str> {
        match self {
            Self::Answer(a) => Some(a),
            Self::Calls(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolOutcome {
    Ok(String),
    Err(String),
}

/// Outcome of executing one [`ToolCallItem`].
#[derive(Clone, Debug, PartialEq)]
pub struct ToolExecResult {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
    pub outcome: ToolOutcome,
}

impl ToolExecResult {
    pub fn ok(item: &ToolCallItem, result: impl Into<String>) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            arguments: item.arguments.clone(),
            outcome: ToolOutcome::Ok(result.into()),
        }
    }

    pub fn err(item: &ToolCallItem, error: impl Into<String>) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            arguments: item.arguments.clone(),
            outcome: ToolOutcome::Err(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Err(_))
    }

    /// Content of the tool turn sent back to the backend.
    pub fn to_content_string(&self) -> String {
        match &self.outcome {
            ToolOutcome::Ok(s) => s.clone(),
            ToolOutcome::Err(e) => format!("Error: {}", e),
        }
    }
}

/// A deferred action requested by the user.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub name: String,
    pub cron: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScheduleAction {
    Create(ScheduleSpec),
    Cancel(String),
}

/// Structured output of a classification pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireThinkingResult", into = "WireThinkingResult")]
pub struct ThinkingResult {
    pub answer: String,
    pub intent: String,
    pub keywords: Vec<String>,
    pub useless: bool,
    pub can_answer: bool,
    pub send_to: Option<String>,
    pub schedule: Option<ScheduleSpec>,
    pub cancel_schedule: Option<String>,
}

impl ThinkingResult {
    /// Result used when the backend output carries no parseable object.
    pub fn from_raw_text(text: impl Into<String>) -> Self {
        Self {
            answer: text.into(),
            can_answer: true,
            ..Default::default()
        }
    }

    /// Both an intent and at least one keyword. Guards against a classifier
    /// flipping `useless` on short input.
    pub fn has_valid_intent(&self) -> bool {
        !self.intent.is_empty() && !self.keywords.is_empty()
    }

    /// Schedule request carried by this result. Cancellation wins when both
    /// a new schedule and a cancellation are asserted.
    pub fn schedule_action(&self) -> Option<ScheduleAction> {
        if let Some(name) = self.cancel_schedule.as_ref().filter(|n| !n.is_empty()) {
            if self.schedule.is_some() {
                tracing::warn!(
                    cancel = %name,
                    "classify result asserts both create and cancel schedule, cancelling"
                );
            }
            return Some(ScheduleAction::Cancel(name.clone()));
        }
        self.schedule.clone().map(ScheduleAction::Create)
    }
}

/// Flat JSON shape the classifier is prompted to emit.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct WireThinkingResult {
    answer: Option<String>,
    intent: Option<String>,
    keywords: Option<Vec<String>>,
    send_to: Option<String>,
    has_schedule: bool,
    schedule_name: Option<String>,
    schedule_cron: Option<String>,
    schedule_message: Option<String>,
    cancel_schedule: Option<String>,
    useless: bool,
    can_answer: bool,
}

impl From<WireThinkingResult> for ThinkingResult {
    fn from(w: WireThinkingResult) -> Self {
        let schedule = if w.has_schedule {
            Some(ScheduleSpec {
                name: w.schedule_name.unwrap_or_default(),
                cron: w.schedule_cron.unwrap_or_default(),
                message: w.schedule_message.unwrap_or_default(),
            })
        } else {
            None
        };
        Self {
            answer: w.answer.unwrap_or_default(),
            intent: w.intent.unwrap_or_default(),
            keywords: w
                .keywords
                .unwrap_or_default()
                .into_iter()
                .filter(|k| !k.trim().is_empty())
                .collect(),
            useless: w.useless,
            can_answer: w.can_answer,
            send_to: w.send_to.filter(|s| !s.is_empty()),
            schedule,
            cancel_schedule: w.cancel_schedule.filter(|s| !s.is_empty()),
        }
    }
}

impl From<ThinkingResult> for WireThinkingResult {
    fn from(r: ThinkingResult) -> Self {
        let has_schedule = r.schedule.is_some();
        let schedule = r.schedule.unwrap_or_default();
        Self {
            answer: Some(r.answer),
            intent: Some(r.intent),
            keywords: Some(r.keywords),
            send_to: r.send_to,
            has_schedule,
            schedule_name: has_schedule.then_some(schedule.name),
            schedule_cron: has_schedule.then_some(schedule.cron),
            schedule_message: has_schedule.then_some(schedule.message),
            cancel_schedule: r.cancel_schedule,
            useless: r.useless,
            can_answer: r.can_answer,
        }
    }
}

/// Externally visible answer of one dispatch.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ThinkingResponse {
    pub answer: String,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,
}

/// Named escalation target: model + system prompt + tool allow-list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Token counts reported by one backend call.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Usage record handed to the external repository.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub duration_ms: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Persona {
    pub name: String,
    pub gender: String,
    pub character: String,
    pub content: String,
}

impl Persona {
    /// Persona block appended to consciousness system prompts.
    pub fn render(&self) -> String {
        format!(
            "\n\n## Persona\nName: {}\nGender: {}\nCharacter: {}\n{}",
            self.name, self.gender, self.character, self.content
        )
    }
}

/// History and memory references gathered before classification.
#[derive(Clone, Debug, Default)]
pub struct PreparedContext {
    pub history: Vec<DialogueMessage>,
    pub references: String,
}
