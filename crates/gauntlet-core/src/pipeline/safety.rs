//! L8 -- output safety check.
//!
//! The last model-backed gate before delivery: a small verifier model checks
//! the near-final response for prompt leakage, hallucinated specifics,
//! privacy leaks, identity confusion, and filler. Fails closed -- a checker
//! that cannot run is a failed check. Optionally backed by an
//! embedding-based grounding comparison against the retrieved context.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use gauntlet_llm::{ChatMessage, ChatOptions, ModelBackend};
use gauntlet_types::trace::ModelCallRecord;

use crate::grounding;
use crate::prompts::PromptStore;

/// The closed set of issue labels; unknown labels from the checker are
/// dropped.
const ISSUE_LABELS: &[&str] = &[
    "prompt_leakage",
    "inappropriate",
    "hallucination",
    "unprofessional",
    "private_info",
    "identity_confusion",
    "attention_disrespect",
];

/// How much context the checker sees.
const CONTEXT_PREVIEW_CHARS: usize = 2000;
/// Sentences below the similarity floor before the grounding check flags
/// the response.
const MAX_UNGROUNDED_SENTENCES: usize = 2;

/// What L8 concluded.
#[derive(Debug, Clone)]
pub struct SafetyOutcome {
    pub safe: bool,
    /// Clamped issue labels, empty when safe.
    pub issues: Vec<String>,
    pub calls: Vec<ModelCallRecord>,
}

/// Configuration for the optional grounding check.
#[derive(Debug, Clone)]
pub struct GroundingConfig {
    pub enabled: bool,
    pub embedding_model: String,
    pub min_similarity: f32,
}

/// The L8 safety checker stage.
pub struct SafetyChecker {
    backend: Arc<dyn ModelBackend>,
    prompts: Arc<PromptStore>,
    model: String,
    timeout: Duration,
    grounding: GroundingConfig,
}

impl SafetyChecker {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        prompts: Arc<PromptStore>,
        model: String,
        timeout: Duration,
        grounding: GroundingConfig,
    ) -> Self {
        Self {
            backend,
            prompts,
            model,
            timeout,
            grounding,
        }
    }

    /// Check whether the response is safe to deliver.
    pub async fn check(&self, response: &str, context: &str) -> SafetyOutcome {
        let mut calls = Vec::new();

        let classifier_verdict = self.classifier_check(response, context, &mut calls).await;
        if !classifier_verdict.0 {
            return SafetyOutcome {
                safe: false,
                issues: classifier_verdict.1,
                calls,
            };
        }

        if self.grounding.enabled && !context.is_empty() {
            if let Some(grounded) = self.grounding_check(response, context).await {
                if !grounded {
                    return SafetyOutcome {
                        safe: false,
                        issues: vec!["hallucination".into()],
                        calls,
                    };
                }
            }
            // An unavailable embedding backend disables the secondary check
            // for this request; the classifier check already passed.
        }

        SafetyOutcome {
            safe: true,
            issues: Vec::new(),
            calls,
        }
    }

    async fn classifier_check(
        &self,
        response: &str,
        context: &str,
        calls: &mut Vec<ModelCallRecord>,
    ) -> (bool, Vec<String>) {
        let context_preview: String = context.chars().take(CONTEXT_PREVIEW_CHARS).collect();
        let request = format!(
            "RESPONSE TO CHECK:\n```\n{response}\n```\n\n\
             CONTEXT THAT WAS PROVIDED:\n```\n{context_preview}\n```\n\n\
             Check if the response is safe to send. Output JSON only."
        );
        let messages = [
            ChatMessage::system(self.prompts.safety_checker()),
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
                // Fail closed.
                warn!(%err, "safety checker unavailable, treating as unsafe");
                return (false, vec!["checker_unavailable".into()]);
            }
        };

        calls.push(ModelCallRecord {
            model: outcome.model,
            duration_ms: outcome.duration.as_millis() as u64,
            tokens_in: outcome.tokens_in,
            tokens_out: outcome.tokens_out,
        });

        // Absent or non-boolean `safe` fails closed.
        let safe = value.get("safe").and_then(|v| v.as_bool()).unwrap_or(false);
        if safe {
            return (true, Vec::new());
        }

        let issues: Vec<String> = value
            .get("issues")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|i| i.as_str())
                    .map(str::to_ascii_lowercase)
                    .filter(|label| ISSUE_LABELS.contains(&label.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        warn!(?issues, "response failed safety check");
        (false, issues)
    }

    /// Embedding comparison: each factual sentence must have semantic
    /// support somewhere in the context. `None` when embeddings are
    /// unavailable.
    async fn grounding_check(&self, response: &str, context: &str) -> Option<bool> {
        let sentences: Vec<String> = grounding::split_sentences(response)
            .into_iter()
            .filter(|s| !grounding::is_meta_sentence(s))
            .collect();
        if sentences.is_empty() {
            return Some(true);
        }

        let chunks = grounding::chunk_context(context, 500);
        let mut chunk_embeddings = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            match self
                .backend
                .embed(&self.grounding.embedding_model, chunk)
                .await
            {
                Ok(vec) => chunk_embeddings.push(vec),
                Err(err) => {
                    debug!(%err, "embedding unavailable, skipping grounding check");
                    return None;
                }
            }
        }

        let mut ungrounded = 0usize;
        for sentence in &sentences {
            let embedding = match self
                .backend
                .embed(&self.grounding.embedding_model, sentence)
                .await
            {
                Ok(vec) => vec,
                Err(_) => continue,
            };
            let best = chunk_embeddings
                .iter()
                .map(|chunk| grounding::cosine_similarity(&embedding, chunk))
                .fold(0.0f32, f32::max);
            if best < self.grounding.min_similarity {
                ungrounded += 1;
            }
        }

        Some(ungrounded < MAX_UNGROUNDED_SENTENCES)
    }
}
