//! Native Ollama backend implementation.
//!
//! Speaks the Ollama HTTP API directly: `/api/chat` for completions (with
//! `format: "json"` and temperature 0 for JSON-mode calls), `/api/embeddings`
//! for vectors, and `/api/tags` as the health probe. Usage figures come from
//! `prompt_eval_count` / `eval_count` in the response.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::backend::{ChatMessage, ChatOptions, ChatOutcome, ModelBackend};
use crate::error::{BackendError, Result};
use crate::json_guard;

/// Ollama chat response body (the subset the gateway reads).
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// A [`ModelBackend`] backed by a local Ollama server.
pub struct OllamaBackend {
    base_url: String,
    http: reqwest::Client,
}

impl OllamaBackend {
    /// Create a backend pointing at the given base URL
    /// (e.g. `http://localhost:11434`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn embeddings_url(&self) -> String {
        format!("{}/api/embeddings", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    /// Map a reqwest failure to the backend error taxonomy.
    fn classify(err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_connect() {
            BackendError::Connection(err.to_string())
        } else {
            BackendError::Http(err)
        }
    }

    async fn chat_raw(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
        json_format: bool,
    ) -> Result<ChatOutcome> {
        let mut payload = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": { "temperature": options.temperature },
        });
        if json_format {
            payload["format"] = serde_json::json!("json");
        }

        debug!(model, messages = messages.len(), json_format, "chat request");

        let started = Instant::now();
        let response = self
            .http
            .post(self.chat_url())
            .timeout(options.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(BackendError::Model(format!("model not found: {model}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(500).collect();
            return Err(BackendError::Model(format!("HTTP {status}: {preview}")));
        }

        let body: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Response(format!("unparseable chat response: {e}")))?;

        let text = body.message.map(|m| m.content).unwrap_or_default();
        if text.is_empty() {
            return Err(BackendError::Response("empty completion".into()));
        }

        Ok(ChatOutcome {
            text,
            model: model.to_string(),
            duration: started.elapsed(),
            tokens_in: body.prompt_eval_count.unwrap_or(0),
            tokens_out: body.eval_count.unwrap_or(0),
        })
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatOutcome> {
        self.chat_raw(model, messages, &options, false).await
    }

    async fn chat_json(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<(serde_json::Value, ChatOutcome)> {
        // Classification calls are deterministic.
        let options = ChatOptions {
            temperature: 0.0,
            ..options
        };
        let outcome = self.chat_raw(model, messages, &options, true).await?;

        let value = json_guard::parse_guarded(&outcome.text).map_err(|e| {
            let preview: String = outcome.text.chars().take(200).collect();
            warn!(model, %preview, "JSON-mode output failed strict parse");
            BackendError::MalformedJson(e.to_string())
        })?;

        Ok((value, outcome))
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let payload = serde_json::json!({ "model": model, "prompt": text });

        let response = self
            .http
            .post(self.embeddings_url())
            .timeout(Duration::from_secs(15))
            .json(&payload)
            .send()
            .await
            .map_err(Self::classify)?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(BackendError::Model(format!("embeddings HTTP {status}")));
        }

        let body: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Response(format!("unparseable embedding: {e}")))?;

        if body.embedding.is_empty() {
            return Err(BackendError::Response("empty embedding".into()));
        }
        Ok(body.embedding)
    }

    async fn probe(&self) -> bool {
        let result = self
            .http
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        matches!(result, Ok(r) if r.status().is_success())
    }
}

impl std::fmt::Debug for OllamaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaBackend")
            .field("base_url", &self.base_url)
            .finish()
    }
}
