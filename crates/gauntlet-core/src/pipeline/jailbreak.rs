//! L2 -- jailbreak classifier.
//!
//! One short call to the smallest model, constrained to JSON. Everything
//! about this stage fails closed: backend errors, timeouts, malformed JSON,
//! and low-confidence SAFE verdicts all terminate the request.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use gauntlet_llm::{ChatMessage, ChatOptions, ModelBackend};
use gauntlet_types::trace::ModelCallRecord;

use crate::conversation::ConversationSnapshot;
use crate::prompts::PromptStore;

/// BLOCKED verdicts at or above this confidence terminate.
const BLOCK_CONFIDENCE: f64 = 0.5;
/// SAFE verdicts below this confidence are treated as BLOCKED.
const MIN_SAFE_CONFIDENCE: f64 = 0.3;
/// How many recent user turns the classifier sees for multi-turn detection.
const HISTORY_TURNS: usize = 2;
/// Truncation bound per history turn.
const HISTORY_CHARS: usize = 200;

/// Known reason codes; anything else clamps to `unknown`.
const REASON_CODES: &[&str] = &[
    "none",
    "instruction_override",
    "prompt_extraction",
    "roleplay_attack",
    "encoding_trick",
    "manipulation",
    "multi_turn_attack",
];

/// How L2 concluded.
#[derive(Debug, Clone)]
pub enum JailbreakOutcome {
    Safe {
        confidence: f64,
        call: ModelCallRecord,
    },
    Blocked {
        reason: String,
        confidence: f64,
        call: Option<ModelCallRecord>,
    },
}

impl JailbreakOutcome {
    pub fn blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// The L2 classifier stage.
pub struct JailbreakClassifier {
    backend: Arc<dyn ModelBackend>,
    prompts: Arc<PromptStore>,
    model: String,
    timeout: Duration,
}

impl JailbreakClassifier {
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

    /// Classify the sanitized message, with recent user turns for
    /// multi-turn detection.
    pub async fn classify(
        &self,
        message: &str,
        conversation: &ConversationSnapshot,
    ) -> JailbreakOutcome {
        let user_prompt = format_input(message, conversation);
        let messages = [
            ChatMessage::system(self.prompts.jailbreak_classifier()),
            ChatMessage::user(user_prompt),
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
                // Fail closed: an unverifiable message is a blocked message.
                warn!(%err, "jailbreak classifier unavailable, blocking");
                return JailbreakOutcome::Blocked {
                    reason: "classifier_error".into(),
                    confidence: 0.0,
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

        let classification = value
            .get("classification")
            .and_then(|v| v.as_str())
            .unwrap_or("BLOCKED")
            .to_ascii_uppercase();
        let confidence = value
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        let reason_raw = value
            .get("reason_code")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let reason = if REASON_CODES.contains(&reason_raw) {
            reason_raw.to_string()
        } else {
            "unknown".to_string()
        };

        if classification == "SAFE" {
            if confidence < MIN_SAFE_CONFIDENCE {
                // A hesitant SAFE is not safe.
                return JailbreakOutcome::Blocked {
                    reason: "low_confidence_safe".into(),
                    confidence,
                    call: Some(call),
                };
            }
            return JailbreakOutcome::Safe { confidence, call };
        }

        if confidence >= BLOCK_CONFIDENCE {
            warn!(reason = %reason, confidence, "jailbreak detected");
            return JailbreakOutcome::Blocked {
                reason,
                confidence,
                call: Some(call),
            };
        }

        // BLOCKED but hesitant: the classifier saw something; block anyway.
        JailbreakOutcome::Blocked {
            reason,
            confidence,
            call: Some(call),
        }
    }
}

/// Format the classifier input: recent user turns, then the current message
/// in a fenced block.
fn format_input(message: &str, conversation: &ConversationSnapshot) -> String {
    let mut parts = Vec::new();

    let recent = conversation.recent_user_turns(HISTORY_TURNS, HISTORY_CHARS);
    if !recent.is_empty() {
        parts.push("PREVIOUS USER MESSAGES:".to_string());
        for (i, turn) in recent.iter().enumerate() {
            parts.push(format!("{}. {}", i + 1, turn));
        }
        parts.push(String::new());
    }

    parts.push("CURRENT MESSAGE TO CLASSIFY:".to_string());
    parts.push(format!("```\n{message}\n```"));
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_snapshot() -> ConversationSnapshot {
        ConversationSnapshot {
            id: "c".into(),
            turns: Vec::new(),
            turn_count: 0,
            is_new: true,
        }
    }

    #[test]
    fn input_format_without_history() {
        let input = format_input("what do you do?", &empty_snapshot());
        assert!(input.starts_with("CURRENT MESSAGE TO CLASSIFY:"));
        assert!(input.contains("```\nwhat do you do?\n```"));
        assert!(!input.contains("PREVIOUS USER MESSAGES"));
    }

    #[test]
    fn input_format_with_history() {
        use crate::conversation::{Turn, TurnRole};
        use std::time::Instant;

        let snapshot = ConversationSnapshot {
            id: "c".into(),
            turns: vec![
                Turn {
                    role: TurnRole::User,
                    content: "first question".into(),
                    at: Instant::now(),
                    domain: None,
                    response_time_ms: None,
                },
                Turn {
                    role: TurnRole::Assistant,
                    content: "an answer".into(),
                    at: Instant::now(),
                    domain: None,
                    response_time_ms: None,
                },
            ],
            turn_count: 1,
            is_new: false,
        };
        let input = format_input("follow-up", &snapshot);
        assert!(input.contains("PREVIOUS USER MESSAGES:"));
        assert!(input.contains("1. first question"));
        assert!(!input.contains("an answer"), "assistant turns are not shown");
    }

    #[test]
    fn reason_codes_are_closed() {
        assert!(REASON_CODES.contains(&"prompt_extraction"));
        assert!(!REASON_CODES.contains(&"anything_else"));
    }
}
