//! Contracts of the external collaborators the dispatch engine consumes.
//!
//! Tool implementation, memory ranking, history storage, capability
//! matching, and job storage all live behind these traits.

use crate::error::Result;
use crate::types::{Capability, DialogueMessage, ScheduleSpec, TokenUsageRecord, ToolSchema};
use serde_json::{Map, Value};

#[async_trait::async_trait]
pub trait SkillRegistry: Send + Sync {
    /// Tools relevant to the given keywords. Also used to look up tools by exact name.
    async fn search_tools(&self, keywords: &[String]) -> Result<Vec<ToolSchema>>;

    async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> Result<String>;

    /// Keywords describing the currently loaded skill catalog, used as a
    /// classification hint.
    async fn keywords(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[async_trait::async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Reference text recalled for the question. Empty when nothing matches.
    async fn references(&self, question: &str) -> Result<String>;

    /// Most recent conversation, at most `max_rounds` user/assistant rounds.
    async fn history(&self, max_rounds: usize) -> Result<Vec<DialogueMessage>>;
}

#[async_trait::async_trait]
pub trait CapabilityResolver: Send + Sync {
    async fn resolve(&self, keywords: &[String]) -> Result<Option<Capability>>;
}

#[async_trait::async_trait]
pub trait JobScheduler: Send + Sync {
    /// Returns the new job id.
    async fn add(&self, job: &ScheduleSpec) -> Result<String>;

    /// Returns whether a job with that name existed.
    async fn remove(&self, name: &str) -> Result<bool>;
}

pub trait TokenUsageRepository: Send + Sync {
    fn save(&self, record: &TokenUsageRecord) -> Result<()>;
}
