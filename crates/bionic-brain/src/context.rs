//! Context preparation with token estimation

use bionic_core::{MemoryProvider, PreparedContext, Result};
use std::sync::Arc;
use tracing::debug;

const CHARS_PER_TOKEN: f32 = 4.0;

/// Rough token count: one token per four bytes, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() as f32 / CHARS_PER_TOKEN).ceil() as usize
}

/// Gathers memory references and bounded history before classification.
pub struct ContextPreparer {
    memory: Arc<dyn MemoryProvider>,
}

impl ContextPreparer {
    pub fn new(memory: Arc<dyn MemoryProvider>) -> Self {
        Self { memory }
    }

    /// `max_rounds` comes from the classifying engine's token budget.
    pub async fn prepare(&self, question: &str, max_rounds: usize) -> Result<PreparedContext> {
        let references = self.memory.references(question).await?;
        let history = self.memory.history(max_rounds).await?;
        debug!(
            "prepared context: {} history messages (max {} rounds), ~{} reference tokens",
            history.len(),
            max_rounds,
            estimate_tokens(&references)
        );
        Ok(PreparedContext {
            history,
            references,
        })
    }
}
