//! L3 -- intent parser.
//!
//! One call to the small router model produces the full intent record; the
//! domain router (L4) consumes it without another model call. Unlike the
//! classifiers, this stage does not fail closed: a backend failure degrades
//! to the fallback intent and routing decides what to do with it.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use gauntlet_llm::{ChatMessage, ChatOptions, ModelBackend};
use gauntlet_types::intent::{clamp_confidence, EmotionalTone, Intent, QuestionType, Topic};
use gauntlet_types::trace::ModelCallRecord;

use crate::prompts::PromptStore;

/// Parsed intent plus the model call that produced it (absent on fallback).
#[derive(Debug, Clone)]
pub struct IntentOutcome {
    pub intent: Intent,
    pub call: Option<ModelCallRecord>,
}

/// The L3 intent parser stage.
pub struct IntentParser {
    backend: Arc<dyn ModelBackend>,
    prompts: Arc<PromptStore>,
    model: String,
    timeout: Duration,
}

impl IntentParser {
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

    /// Parse the sanitized message into a structured intent.
    pub async fn parse(&self, message: &str) -> IntentOutcome {
        let messages = [
            ChatMessage::system(self.prompts.intent_parser()),
            ChatMessage::user(format!("Parse the intent of this message:\n\n{message}")),
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
                warn!(%err, "intent parse failed, using fallback intent");
                return IntentOutcome {
                    intent: Intent::fallback(),
                    call: None,
                };
            }
        };

        let call = ModelCallRecord {
            model: outcome.model,
            duration_ms: outcome.duration.as_millis() as u64,
            tokens_in: outcome.tokens_in,
            tokens_out: outcome.tokens_out,
        };

        // Clamp every axis to its closed enum.
        let topic = Topic::clamp(value.get("topic").and_then(|v| v.as_str()).unwrap_or(""));
        let question_type = QuestionType::clamp(
            value
                .get("question_type")
                .and_then(|v| v.as_str())
                .unwrap_or(""),
        );
        let emotional_tone = EmotionalTone::clamp(
            value
                .get("emotional_tone")
                .and_then(|v| v.as_str())
                .unwrap_or(""),
        );
        let confidence =
            clamp_confidence(value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0));
        let entities = value
            .get("entities")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|e| e.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        IntentOutcome {
            intent: Intent {
                topic,
                question_type,
                entities,
                emotional_tone,
                confidence,
            },
            call: Some(call),
        }
    }
}
