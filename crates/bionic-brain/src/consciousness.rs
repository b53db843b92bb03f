//! Consciousness manager - lazily built escalation brains
//!
//! One engine per capability, bound to the capability's prompt and model,
//! plus a single dual-brain pair used when no capability matches. Creation
//! is idempotent; engines live for the manager's lifetime.

use crate::factory::BackendFactory;
use crate::prompt;
use crate::thinking::{ClassifyInput, Thinking, TurnContext};
use bionic_core::config::{BrainConfig, ModelConfig};
use bionic_core::{
    Capability, DialogueMessage, Error, Result, ThinkingResult, TokenUsageRepository,
};
use bionic_llm::{GenerationClient, RetryPolicy};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Left/right pair mirroring the primary pipeline on heavier models.
pub struct DualBrain {
    pub left: Arc<Thinking>,
    pub right: Arc<Thinking>,
}

pub struct ConsciousnessManager {
    config: Arc<BrainConfig>,
    factory: Arc<dyn BackendFactory>,
    usage_repo: Option<Arc<dyn TokenUsageRepository>>,
    engines: DashMap<String, Arc<Thinking>>,
    dual: OnceCell<DualBrain>,
}

impl ConsciousnessManager {
    pub fn new(
        config: Arc<BrainConfig>,
        factory: Arc<dyn BackendFactory>,
        usage_repo: Option<Arc<dyn TokenUsageRepository>>,
    ) -> Self {
        Self {
            config,
            factory,
            usage_repo,
            engines: DashMap::new(),
            dual: OnceCell::new(),
        }
    }

    /// Engine for `capability`, built on first use.
    pub fn ensure_created(&self, capability: &Capability) -> Result<Arc<Thinking>> {
        if let Some(engine) = self.engines.get(&capability.name) {
            return Ok(engine.clone());
        }

        let model = self.config.model_or_local(&capability.model);
        info!(
            capability = %capability.name,
            model = %model.name,
            "creating consciousness"
        );
        let client = self.factory.client_for(&model)?;
        let engine = Arc::new(self.engine(
            format!("consciousness:{}", capability.name),
            model,
            prompt::consciousness_prompt(capability, &self.config.persona),
            client,
        ));

        Ok(self
            .engines
            .entry(capability.name.clone())
            .or_insert(engine)
            .clone())
    }

    /// The dual-brain pair, built on first use.
    pub async fn ensure_dual_brain_created(&self) -> Result<&DualBrain> {
        self.dual
            .get_or_try_init(|| async {
                let left_model = self
                    .config
                    .slot_model(&self.config.brain.consciousness_left);
                let right_model = self
                    .config
                    .slot_model(&self.config.brain.consciousness_right);
                info!(
                    left = %left_model.name,
                    right = %right_model.name,
                    "creating consciousness dual brain"
                );

                let left_client = self.factory.client_for(&left_model)?;
                let right_client = self.factory.client_for(&right_model)?;
                Ok::<_, Error>(DualBrain {
                    left: Arc::new(self.engine(
                        "consciousness-left",
                        left_model,
                        prompt::cloud_classifier_prompt(&self.config.persona),
                        left_client,
                    )),
                    right: Arc::new(self.engine(
                        "consciousness-right",
                        right_model,
                        String::new(),
                        right_client,
                    )),
                })
            })
            .await
    }

    pub fn get(&self, capability: &str) -> Option<Arc<Thinking>> {
        self.engines.get(capability).map(|e| e.clone())
    }

    pub fn dual_brain(&self) -> Option<&DualBrain> {
        self.dual.get()
    }

    pub fn is_initialized(&self) -> bool {
        !self.engines.is_empty() || self.dual.initialized()
    }

    /// Plain answer from the capability's engine, or a structured pass on the
    /// dual brain's left half when no such engine exists.
    pub async fn think(
        &self,
        capability: &str,
        question: &str,
        history: &[DialogueMessage],
        references: &str,
        turn: &TurnContext,
    ) -> Result<ThinkingResult> {
        let input = ClassifyInput::new(question)
            .with_history(history)
            .with_references(references);
        if let Some(engine) = self.get(capability) {
            return engine.classify(input.unstructured(), turn).await;
        }
        if let Some(dual) = self.dual.get() {
            return dual.left.classify(input, turn).await;
        }
        Err(Error::Escalation("consciousness not initialized".into()))
    }

    fn engine(
        &self,
        label: impl Into<String>,
        model: ModelConfig,
        prompt: String,
        client: Arc<dyn GenerationClient>,
    ) -> Thinking {
        Thinking::new(label, model, prompt, client, self.config.token_budget.clone())
            .with_retry(RetryPolicy::from(&self.config.retry))
            .with_usage_repository(self.usage_repo.clone())
    }
}
