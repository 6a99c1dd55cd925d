//! The [`ModelBackend`] trait the pipeline is written against.
//!
//! Implementations handle the wire protocol for a specific model runtime.
//! The main implementation is [`OllamaBackend`](crate::ollama::OllamaBackend);
//! tests substitute scripted mocks.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single message in a chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Sampling temperature. JSON-mode calls pin this to 0.
    pub temperature: f32,
    /// Per-call deadline.
    pub timeout: Duration,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Outcome of a chat call, including the usage figures the trace records.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// The generated text.
    pub text: String,
    /// The model that produced it.
    pub model: String,
    /// Wall-clock duration of the call.
    pub duration: Duration,
    /// Prompt tokens consumed, when the backend reports them.
    pub tokens_in: u32,
    /// Completion tokens produced, when the backend reports them.
    pub tokens_out: u32,
}

/// A model runtime exposing chat-completion and embedding calls.
///
/// # Errors
///
/// Implementations classify failures via
/// [`BackendError`](crate::error::BackendError): transport failures are
/// retryable, content failures are not, and a failed call never fabricates
/// content.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Execute a chat completion and return the full text.
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatOutcome>;

    /// Execute a chat completion constrained to JSON output and return the
    /// strictly-parsed value alongside the raw outcome.
    async fn chat_json(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<(serde_json::Value, ChatOutcome)>;

    /// Embed a single text.
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>>;

    /// Cheap liveness probe. `true` when the runtime is reachable and has
    /// models loaded.
    async fn probe(&self) -> bool;
}
