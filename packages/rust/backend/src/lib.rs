//! Inference backends.
//!
//! A [`Backend`] takes a model identifier plus ordered role-tagged messages
//! and returns generated text. [`OllamaBackend`] speaks the Ollama chat API;
//! [`invoke`] wraps one call with timing.

mod invoke;
mod ollama;

pub use invoke::{Invocation, build_messages, invoke};
pub use ollama::OllamaBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use promptbatch_shared::Result;

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// An inference service reachable at one host.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Host identity used in logs and errors.
    fn host(&self) -> &str;

    /// Issue a single generation request. No retries.
    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;
}
