//! Single-retry wrapper for transport failures.
//!
//! [`RetryBackend`] wraps any [`ModelBackend`] and retries exactly once when
//! the failure is transport-level ([`BackendError::is_retryable`]). Content
//! errors -- model failures, malformed JSON -- pass through untouched so the
//! pipeline can fail closed on them.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::backend::{ChatMessage, ChatOptions, ChatOutcome, ModelBackend};
use crate::error::Result;

/// A backend wrapper that retries transport failures once.
pub struct RetryBackend<B> {
    inner: B,
    backoff: Duration,
}

impl<B: ModelBackend> RetryBackend<B> {
    /// Wrap a backend with the default 500ms backoff before the retry.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            backoff: Duration::from_millis(500),
        }
    }

    /// Override the backoff before the single retry.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns a reference to the wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    async fn pause(&self, what: &str, err: &crate::BackendError) {
        warn!(error = %err, call = what, "retrying after transport error");
        tokio::time::sleep(self.backoff).await;
    }
}

#[async_trait]
impl<B: ModelBackend> ModelBackend for RetryBackend<B> {
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatOutcome> {
        match self.inner.chat(model, messages, options.clone()).await {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_retryable() => {
                self.pause("chat", &err).await;
                self.inner.chat(model, messages, options).await
            }
            Err(err) => Err(err),
        }
    }

    async fn chat_json(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<(serde_json::Value, ChatOutcome)> {
        match self.inner.chat_json(model, messages, options.clone()).await {
            Ok(result) => Ok(result),
            Err(err) if err.is_retryable() => {
                self.pause("chat_json", &err).await;
                self.inner.chat_json(model, messages, options).await
            }
            Err(err) => Err(err),
        }
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        match self.inner.embed(model, text).await {
            Ok(vec) => Ok(vec),
            Err(err) if err.is_retryable() => {
                self.pause("embed", &err).await;
                self.inner.embed(model, text).await
            }
            Err(err) => Err(err),
        }
    }

    async fn probe(&self) -> bool {
        self.inner.probe().await
    }
}
