//! Thinking events - a lossy progress side channel for UI streaming

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingEventType {
    Start,
    Progress,
    Chunk,
    ToolCall,
    ToolResult,
    Complete,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThinkingEvent {
    #[serde(rename = "type")]
    pub event_type: ThinkingEventType,
    pub content: String,
    /// 0-100
    pub progress: f64,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ThinkingEvent {
    pub fn new(event_type: ThinkingEventType, content: impl Into<String>) -> Self {
        Self {
            event_type,
            content: content.into(),
            progress: 0.0,
            timestamp: chrono::Utc::now().timestamp(),
            metadata: Map::new(),
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = progress.clamp(0.0, 100.0);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn tool_call(name: &str, arguments: &Map<String, Value>) -> Self {
        Self::new(ThinkingEventType::ToolCall, name)
            .with_metadata("function", Value::String(name.to_string()))
            .with_metadata("arguments", Value::Object(arguments.clone()))
    }

    pub fn tool_result(name: &str, result: &str) -> Self {
        Self::new(ThinkingEventType::ToolResult, result)
            .with_metadata("function", Value::String(name.to_string()))
    }
}

/// Request-scoped event destination.
///
/// Emission never blocks: when the subscriber is slow or gone the event is
/// dropped. A disabled sink drops everything.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    session_id: Option<Arc<str>>,
    tx: Option<mpsc::Sender<ThinkingEvent>>,
}

impl EventSink {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(session_id: impl Into<String>, tx: mpsc::Sender<ThinkingEvent>) -> Self {
        Self {
            session_id: Some(Arc::from(session_id.into())),
            tx: Some(tx),
        }
    }

    /// Sink plus the receiving end, bounded to `capacity` undelivered events.
    pub fn channel(
        session_id: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ThinkingEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(session_id, tx), rx)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Best-effort delivery. Returns whether the event was queued.
    pub fn emit(&self, event: ThinkingEvent) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::trace!(
                    session = self.session_id().unwrap_or(""),
                    event = ?event.event_type,
                    "event subscriber lagging, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn start(&self, content: impl Into<String>) {
        self.emit(ThinkingEvent::new(ThinkingEventType::Start, content));
    }

    pub fn progress(&self, content: impl Into<String>, progress: f64) {
        self.emit(ThinkingEvent::new(ThinkingEventType::Progress, content).with_progress(progress));
    }

    pub fn chunk(&self, content: impl Into<String>) {
        self.emit(ThinkingEvent::new(ThinkingEventType::Chunk, content));
    }

    pub fn complete(&self, content: impl Into<String>) {
        self.emit(ThinkingEvent::new(ThinkingEventType::Complete, content).with_progress(100.0));
    }

    pub fn error(&self, content: impl Into<String>) {
        self.emit(ThinkingEvent::new(ThinkingEventType::Error, content));
    }
}
