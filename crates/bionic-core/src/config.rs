//! Brain configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists.

use crate::error::{Error, Result};
use crate::types::{Capability, Persona};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Base URL used for models a capability names but the config does not list.
pub const LOCAL_BASE_URL: &str = "http://localhost:11434/v1";

/// Top-level brain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    /// Model used whenever a brain slot is left empty.
    pub default_model: String,
    /// Known generation backends.
    pub models: Vec<ModelConfig>,
    /// Model selection per brain slot.
    pub brain: BrainModels,
    pub token_budget: TokenBudgetConfig,
    pub retry: RetryConfig,
    pub dispatch: DispatchConfig,
    pub persona: Persona,
    /// Capabilities served by the static resolver.
    pub capabilities: Vec<Capability>,
}

/// One OpenAI-compatible backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub base_url: String,
    /// Environment variable holding the API key. Empty for keyless local servers.
    pub api_key_env: String,
    /// Sampling temperature. Not sent when zero.
    pub temperature: f32,
    /// Context window size in tokens.
    pub context_tokens: u32,
    /// Completion cap sent with each request. Not sent when zero.
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainModels {
    pub subconscious_left: String,
    pub subconscious_right: String,
    pub consciousness_left: String,
    pub consciousness_right: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBudgetConfig {
    /// Tokens kept free for the completion.
    pub reserved_output_tokens: u32,
    /// History rounds retained no matter how tight the budget is.
    pub min_history_rounds: usize,
    /// Cost of one round before any usage has been observed.
    pub avg_tokens_per_round: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Deadline for one whole request.
    pub request_timeout_secs: u64,
    /// Tool executions allowed per orchestration, across all rounds.
    pub max_tool_calls: usize,
    /// Undelivered events buffered per subscriber before dropping.
    pub event_buffer: usize,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            default_model: "qwen3:1.7b".into(),
            models: vec![ModelConfig::local("qwen3:1.7b")],
            brain: BrainModels::default(),
            token_budget: TokenBudgetConfig::default(),
            retry: RetryConfig::default(),
            dispatch: DispatchConfig::default(),
            persona: Persona::default(),
            capabilities: Vec::new(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_url: LOCAL_BASE_URL.into(),
            api_key_env: String::new(),
            temperature: 0.0,
            context_tokens: 8_192,
            max_output_tokens: 0,
        }
    }
}

impl ModelConfig {
    /// Keyless model served by a local OpenAI-compatible server.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// API key from the configured environment variable, if any.
    pub fn api_key(&self) -> Option<String> {
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            reserved_output_tokens: 2_048,
            min_history_rounds: 2,
            avg_tokens_per_round: 400,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 300,
            max_tool_calls: 10,
            event_buffer: 64,
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl BrainConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {} - using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {} - using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Load config from a TOML file, surfacing read and parse failures.
    pub fn load_strict(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_model.is_empty() {
            return Err(Error::Config("default_model must not be empty".into()));
        }
        if self.dispatch.max_tool_calls == 0 {
            return Err(Error::Config("dispatch.max_tool_calls must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Configured model by name.
    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Configured model, or a local fallback entry for unknown names.
    pub fn model_or_local(&self, name: &str) -> ModelConfig {
        self.model(name)
            .cloned()
            .unwrap_or_else(|| ModelConfig::local(name))
    }

    /// Model for a brain slot, defaulting empty slots to `default_model`.
    pub fn slot_model(&self, slot: &str) -> ModelConfig {
        let name = if slot.is_empty() {
            self.default_model.as_str()
        } else {
            slot
        };
        self.model_or_local(name)
    }
}
