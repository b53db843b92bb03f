//! Backend construction from model configuration

use bionic_core::config::ModelConfig;
use bionic_core::Result;
use bionic_llm::{GenerationClient, OpenAiProvider};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Builds generation clients for configured models.
pub trait BackendFactory: Send + Sync {
    fn client_for(&self, model: &ModelConfig) -> Result<Arc<dyn GenerationClient>>;
}

/// OpenAI-compatible clients, shared per endpoint and credential.
#[derive(Default)]
pub struct OpenAiFactory {
    clients: DashMap<(String, String), Arc<dyn GenerationClient>>,
}

impl OpenAiFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackendFactory for OpenAiFactory {
    fn client_for(&self, model: &ModelConfig) -> Result<Arc<dyn GenerationClient>> {
        let key = (model.base_url.clone(), model.api_key_env.clone());
        let client = self
            .clients
            .entry(key)
            .or_insert_with(|| {
                debug!("creating backend client for {}", model.base_url);
                Arc::new(OpenAiProvider::from_model(model))
            })
            .clone();
        Ok(client)
    }
}
