//! Error types for Bionic

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Backend unreachable, non-2xx, or malformed stream, after retries.
    #[error("model error: {model} - {message}")]
    Model { model: String, message: String },

    #[error("skill error: {name} - {message}")]
    Skill { name: String, message: String },

    /// Malformed structured output that cannot be recovered locally.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("escalation error: {0}")]
    Escalation(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("collaborator error: {source_name} - {message}")]
    Collaborator { source_name: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn model(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Model {
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn skill(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Skill {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn collaborator(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Timeout and cancellation terminate a request; every other stage error
    /// past classification degrades instead.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Cancelled)
    }
}
