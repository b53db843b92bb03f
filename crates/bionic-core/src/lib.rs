//! Bionic Core - Types, collaborator traits, configuration, and error handling

pub mod collaborators;
pub mod config;
pub mod error;
pub mod event;
pub mod types;

pub use collaborators::*;
pub use config::BrainConfig;
pub use error::{Error, Result};
pub use event::{EventSink, ThinkingEvent, ThinkingEventType};
pub use types::*;
