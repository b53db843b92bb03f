//! Chat-completion types for requests and streaming responses

use bionic_core::{DialogueMessage, TokenUsage, ToolSchema};
use serde::{Deserialize, Serialize};

/// Chat-completion request
#[derive(Clone, Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    /// Template switches understood by some servers (e.g. `enable_thinking`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_template_kwargs: Option<serde_json::Value>,
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self {
            model: String::new(),
            messages: Vec::new(),
            tools: None,
            tool_choice: None,
            max_tokens: None,
            temperature: None,
            stream: false,
            stream_options: None,
            response_format: None,
            chat_template_kwargs: None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            format_type: "json_object".into(),
        }
    }
}

/// Message in a chat conversation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    /// Assistant turn recording the calls it made.
    pub fn assistant_tool_calls(calls: Vec<WireToolCall>) -> Self {
        Self {
            role: "assistant".into(),
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

impl From<&DialogueMessage> for ChatMessage {
    fn from(m: &DialogueMessage) -> Self {
        Self::plain(m.role.as_str(), m.content.clone())
    }
}

/// Tool definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl From<&ToolSchema> for ChatTool {
    fn from(schema: &ToolSchema) -> Self {
        let parameters = if schema.parameters.is_null() {
            serde_json::json!({"type": "object", "properties": {}})
        } else {
            schema.parameters.clone()
        };
        Self {
            tool_type: "function".into(),
            function: FunctionDefinition {
                name: schema.name.clone(),
                description: schema.full_description(),
                parameters,
            },
        }
    }
}

/// Tool call as it appears on the wire. Arguments are a JSON-encoded string.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WireToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".into()
}

impl WireToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Non-streaming completion result (first choice only).
#[derive(Clone, Debug, Default)]
pub struct ChatResponse {
    pub content: String,
    pub reasoning: String,
    pub tool_calls: Vec<WireToolCall>,
    /// Deprecated single-call field some servers still emit.
    pub function_call: Option<FunctionCall>,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
}

/// Streaming delta
#[derive(Clone, Debug, PartialEq)]
pub enum StreamDelta {
    Text(String),
    /// Reasoning emitted in a dedicated field (`reasoning_content`).
    Reasoning(String),
    Usage(TokenUsage),
    Done { finish_reason: Option<String> },
}
