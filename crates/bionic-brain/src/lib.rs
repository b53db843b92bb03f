//! Bionic Brain - Two-tier cognitive dispatch over OpenAI-compatible backends

pub mod budget;
pub mod consciousness;
pub mod context;
pub mod extract;
pub mod factory;
pub mod fallback;
pub mod pipeline;
pub mod prompt;
pub mod response;
pub mod thinking;
pub mod tool_caller;

pub use budget::TokenBudgetManager;
pub use consciousness::{ConsciousnessManager, DualBrain};
pub use context::ContextPreparer;
pub use factory::{BackendFactory, OpenAiFactory};
pub use fallback::FallbackHandler;
pub use pipeline::{Brain, BrainDeps};
pub use thinking::{ClassifyInput, Thinking, TurnContext};
pub use tool_caller::ToolCaller;
