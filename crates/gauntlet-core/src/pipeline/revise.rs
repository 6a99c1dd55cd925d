//! L7 -- response revision.
//!
//! A self-critique pass over the draft: the checker either approves or
//! returns a revised response. Strictly advisory -- any failure, malformed
//! output, or implausibly short rewrite leaves the draft unchanged. Short
//! drafts skip the pass entirely.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use gauntlet_llm::{ChatMessage, ChatOptions, ModelBackend};
use gauntlet_types::trace::ModelCallRecord;

use crate::prompts::PromptStore;

/// Drafts shorter than this skip revision.
const MIN_LENGTH_FOR_REVISION: usize = 200;
/// A rewrite shorter than this is treated as checker noise.
const MIN_REVISED_LENGTH: usize = 50;
/// How much context the checker sees.
const CONTEXT_PREVIEW_CHARS: usize = 2000;

/// What L7 produced.
#[derive(Debug, Clone)]
pub struct ReviseOutcome {
    pub text: String,
    pub was_revised: bool,
    /// Absent when the pass was skipped or the checker failed.
    pub call: Option<ModelCallRecord>,
    pub skipped: bool,
}

/// The L7 reviser stage.
pub struct Reviser {
    backend: Arc<dyn ModelBackend>,
    prompts: Arc<PromptStore>,
    model: String,
    timeout: Duration,
}

impl Reviser {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        prompts: Arc<PromptStore>,
        model: String,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            prompts,
            model,
            timeout,
        }
    }

    /// Review the draft against the retrieved context.
    pub async fn revise(&self, draft: String, context: &str, question: &str) -> ReviseOutcome {
        if draft.chars().count() < MIN_LENGTH_FOR_REVISION {
            debug!(len = draft.chars().count(), "draft too short, skipping revision");
            return ReviseOutcome {
                text: draft,
                was_revised: false,
                call: None,
                skipped: true,
            };
        }

        let context_preview: String = context.chars().take(CONTEXT_PREVIEW_CHARS).collect();
        let request = format!(
            "ORIGINAL QUESTION:\n{question}\n\nCONTEXT PROVIDED:\n```\n{context_preview}\n```\n\n\
             RESPONSE TO REVIEW:\n```\n{draft}\n```\n\n\
             Review the response and check for issues. Output JSON only."
        );
        let messages = [
            ChatMessage::system(self.prompts.revision_checker()),
            ChatMessage::user(request),
        ];
        let options = ChatOptions {
            temperature: 0.0,
            timeout: self.timeout,
        };

        let (value, outcome) = match self
            .backend
            .chat_json(&self.model, &messages, options)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                // Advisory only: the draft ships as-is.
                warn!(%err, "revision check failed, keeping draft");
                return ReviseOutcome {
                    text: draft,
                    was_revised: false,
                    call: None,
                    skipped: false,
                };
            }
        };

        let call = ModelCallRecord {
            model: outcome.model,
            duration_ms: outcome.duration.as_millis() as u64,
            tokens_in: outcome.tokens_in,
            tokens_out: outcome.tokens_out,
        };

        let needs_revision = value
            .get("needs_revision")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !needs_revision {
            return ReviseOutcome {
                text: draft,
                was_revised: false,
                call: Some(call),
                skipped: false,
            };
        }

        let revised = value
            .get("revised_response")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if revised.chars().count() < MIN_REVISED_LENGTH {
            return ReviseOutcome {
                text: draft,
                was_revised: false,
                call: Some(call),
                skipped: false,
            };
        }

        let issues: Vec<&str> = value
            .get("issues")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|i| i.as_str()).collect())
            .unwrap_or_default();
        info!(?issues, "draft revised");

        ReviseOutcome {
            text: revised.to_string(),
            was_revised: true,
            call: Some(call),
            skipped: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gauntlet_llm::{BackendError, ChatOutcome};
    use std::sync::Mutex;

    struct OneShotBackend {
        response: Mutex<Option<String>>,
    }

    impl OneShotBackend {
        fn new(response: Option<&str>) -> Self {
            Self {
                response: Mutex::new(response.map(str::to_string)),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for OneShotBackend {
        async fn chat(
            &self,
            model: &str,
            _messages: &[ChatMessage],
            _options: ChatOptions,
        ) -> gauntlet_llm::Result<ChatOutcome> {
            let text = self
                .response
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| BackendError::Connection("down".into()))?;
            Ok(ChatOutcome {
                text,
                model: model.into(),
                duration: Duration::from_millis(3),
                tokens_in: 5,
                tokens_out: 5,
            })
        }

        async fn chat_json(
            &self,
            model: &str,
            messages: &[ChatMessage],
            options: ChatOptions,
        ) -> gauntlet_llm::Result<(serde_json::Value, ChatOutcome)> {
            let outcome = self.chat(model, messages, options).await?;
            let value = serde_json::from_str(&outcome.text)
                .map_err(|e| BackendError::MalformedJson(e.to_string()))?;
            Ok((value, outcome))
        }

        async fn embed(&self, _model: &str, _text: &str) -> gauntlet_llm::Result<Vec<f32>> {
            Ok(vec![0.0])
        }

        async fn probe(&self) -> bool {
            true
        }
    }

    fn reviser(response: Option<&str>) -> Reviser {
        Reviser::new(
            Arc::new(OneShotBackend::new(response)),
            Arc::new(PromptStore::embedded()),
            "mistral:7b".into(),
            Duration::from_secs(5),
        )
    }

    fn long_draft() -> String {
        "This is a long draft response about professional experience. ".repeat(5)
    }

    #[tokio::test]
    async fn short_draft_skips_revision() {
        let reviser = reviser(None); // backend would fail if called
        let outcome = reviser.revise("Short answer.".into(), "ctx", "q").await;
        assert!(outcome.skipped);
        assert!(!outcome.was_revised);
        assert_eq!(outcome.text, "Short answer.");
        assert!(outcome.call.is_none());
    }

    #[tokio::test]
    async fn approval_keeps_draft() {
        let reviser = reviser(Some(r#"{"needs_revision": false}"#));
        let draft = long_draft();
        let outcome = reviser.revise(draft.clone(), "ctx", "q").await;
        assert!(!outcome.was_revised);
        assert_eq!(outcome.text, draft);
        assert!(outcome.call.is_some());
    }

    #[tokio::test]
    async fn revision_replaces_draft() {
        let revised = "A revised response that is comfortably longer than the sanity floor.";
        let reviser = reviser(Some(&format!(
            r#"{{"needs_revision": true, "issues": ["tone"], "revised_response": "{revised}"}}"#
        )));
        let outcome = reviser.revise(long_draft(), "ctx", "q").await;
        assert!(outcome.was_revised);
        assert_eq!(outcome.text, revised);
    }

    #[tokio::test]
    async fn implausibly_short_rewrite_rejected() {
        let reviser = reviser(Some(
            r#"{"needs_revision": true, "issues": ["x"], "revised_response": "nah"}"#,
        ));
        let draft = long_draft();
        let outcome = reviser.revise(draft.clone(), "ctx", "q").await;
        assert!(!outcome.was_revised);
        assert_eq!(outcome.text, draft);
    }

    #[tokio::test]
    async fn checker_failure_keeps_draft() {
        let reviser = reviser(None);
        let draft = long_draft();
        let outcome = reviser.revise(draft.clone(), "ctx", "q").await;
        assert!(!outcome.was_revised);
        assert_eq!(outcome.text, draft);
        assert!(outcome.call.is_none());
    }

    #[tokio::test]
    async fn malformed_checker_output_keeps_draft() {
        let reviser = reviser(Some("the response looks fine to me"));
        let draft = long_draft();
        let outcome = reviser.revise(draft.clone(), "ctx", "q").await;
        assert!(!outcome.was_revised);
        assert_eq!(outcome.text, draft);
    }
}
