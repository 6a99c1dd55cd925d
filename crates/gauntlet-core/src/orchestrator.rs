//! Request orchestration.
//!
//! Drives L0 through L9 in strict order for one request: enforces the
//! whole-request and per-stage deadlines, maps stage verdicts to terminal
//! error codes, captures the trace on every path, and owns the fail-closed
//! guarantee -- any unhandled internal failure becomes `INTERNAL_ERROR`
//! without exposing detail. The conversation grows by exactly one
//! user/assistant pair on success and not at all on any refusal.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};
use uuid::Uuid;

use gauntlet_llm::{BackendGate, ModelBackend};
use gauntlet_types::{
    ChatResponse, Domain, ErrorCode, GatewayConfig, Intent, RequestTrace, ResponseMeta,
    StageVerdict,
};

use crate::contact::ContactInbox;
use crate::context::ContextRegistry;
use crate::conversation::{ConversationSnapshot, ConversationStore};
use crate::pipeline::gateway::{Gateway, GatewayOutcome};
use crate::pipeline::generate::Generator;
use crate::pipeline::intent::IntentParser;
use crate::pipeline::jailbreak::JailbreakClassifier;
use crate::pipeline::revise::Reviser;
use crate::pipeline::route;
use crate::pipeline::safety::{GroundingConfig, SafetyChecker};
use crate::pipeline::sanitize::{SanitizeOutcome, Sanitizer};
use crate::prompts::PromptStore;
use crate::ratelimit::RateLimiter;
use crate::reqlog::{RequestLog, RequestRecord};
use crate::tools::ToolExecutor;

/// A request as it enters the pipeline: the raw message, the optional
/// conversation id, and the already-hashed client ip. The raw ip never
/// reaches this type.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    pub ip_hash: String,
    /// Declared body size in bytes, when the transport knows it.
    pub body_size: Option<usize>,
}

/// The pipeline orchestrator.
pub struct Orchestrator {
    gateway: Gateway,
    sanitizer: Sanitizer,
    jailbreak: JailbreakClassifier,
    intent: IntentParser,
    registry: Arc<ContextRegistry>,
    generator: Generator,
    reviser: Reviser,
    safety: SafetyChecker,
    conversations: Arc<ConversationStore>,
    reqlog: Arc<RequestLog>,
    gate: BackendGate,
    request_timeout: Duration,
    classifier_timeout: Duration,
    generator_timeout: Duration,
}

impl Orchestrator {
    /// Compose the pipeline from configuration and shared collaborators.
    pub fn new(
        config: &GatewayConfig,
        backend: Arc<dyn ModelBackend>,
        registry: Arc<ContextRegistry>,
        prompts: Arc<PromptStore>,
        inbox: Arc<ContactInbox>,
        reqlog: Arc<RequestLog>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
        let conversations = Arc::new(ConversationStore::new(config.conversation.clone()));
        let tools = Arc::new(ToolExecutor::new(inbox));

        Self {
            gateway: Gateway::new(
                rate_limiter,
                config.security.max_request_size,
                config.security.max_input_length,
            ),
            sanitizer: Sanitizer::new(config.security.max_input_length),
            jailbreak: JailbreakClassifier::new(
                Arc::clone(&backend),
                Arc::clone(&prompts),
                config.models.classifier_model.clone(),
                config.models.classifier_timeout,
            ),
            intent: IntentParser::new(
                Arc::clone(&backend),
                Arc::clone(&prompts),
                config.models.router_model.clone(),
                config.models.classifier_timeout,
            ),
            registry,
            generator: Generator::new(
                Arc::clone(&backend),
                Arc::clone(&prompts),
                tools,
                config.models.generator_model.clone(),
                config.models.generator_timeout,
                config.conversation.max_history_tokens,
            ),
            reviser: Reviser::new(
                Arc::clone(&backend),
                Arc::clone(&prompts),
                config.models.generator_model.clone(),
                config.models.generator_timeout,
            ),
            safety: SafetyChecker::new(
                backend,
                prompts,
                config.models.verifier_model.clone(),
                config.models.classifier_timeout,
                GroundingConfig {
                    enabled: config.safety.grounding_check_enabled,
                    embedding_model: config.models.embedding_model.clone(),
                    min_similarity: config.safety.grounding_min_similarity,
                },
            ),
            conversations,
            reqlog,
            gate: BackendGate::new(config.models.max_concurrency),
            request_timeout: config.security.request_timeout,
            classifier_timeout: config.models.classifier_timeout,
            generator_timeout: config.models.generator_timeout,
        }
    }

    /// Shared conversation store, for the server's periodic sweeper.
    pub fn conversations(&self) -> Arc<ConversationStore> {
        Arc::clone(&self.conversations)
    }

    /// Process one request to a terminal response.
    pub async fn process(&self, request: InboundRequest) -> ChatResponse {
        self.process_traced(request).await.0
    }

    /// Process one request, returning the trace alongside the response.
    pub async fn process_traced(&self, request: InboundRequest) -> (ChatResponse, RequestTrace) {
        let started = Instant::now();
        let deadline = started + self.request_timeout;
        let request_id = Uuid::new_v4().to_string();
        let mut trace = RequestTrace::default();

        let input_length = request.message.chars().count();
        info!(request_id = %request_id, input_length, "request entering pipeline");

        let outcome = self.run_stages(&request, started, deadline, &mut trace).await;

        let response = match outcome {
            StageFlow::Success {
                content,
                domain,
                conversation_id,
            } => {
                let meta = self.meta(&request_id, &conversation_id, started, Some(&trace));
                ChatResponse::ok(content, domain.as_str(), meta)
            }
            StageFlow::Refused { code, conversation_id } => {
                let conversation_id = conversation_id
                    .or_else(|| request.conversation_id.clone())
                    .unwrap_or_default();
                let meta = self.meta(&request_id, &conversation_id, started, None);
                ChatResponse::refusal(code, meta)
            }
        };

        self.write_log(&request, &request_id, input_length, started, &trace);
        (response, trace)
    }

    /// The L0..L8 chain. L9 (delivery) happens in the caller via the
    /// envelope/log helpers so that every early return still flows through
    /// it.
    async fn run_stages(
        &self,
        request: &InboundRequest,
        started: Instant,
        deadline: Instant,
        trace: &mut RequestTrace,
    ) -> StageFlow {
        // ── L0: network gateway ─────────────────────────────────────────
        let stage_start = Instant::now();
        let admitted = self.gateway.admit(
            &request.ip_hash,
            request.body_size,
            &request.message,
        );
        match admitted {
            GatewayOutcome::Passed => {
                trace.record_stage("L0", ms_since(stage_start), StageVerdict::Passed);
            }
            GatewayOutcome::RateLimited(verdict) => {
                trace.record_stage("L0", ms_since(stage_start), StageVerdict::Blocked);
                trace.mark_blocked("L0", verdict.as_str());
                return StageFlow::refused(ErrorCode::RateLimited);
            }
            GatewayOutcome::RequestTooLarge | GatewayOutcome::MessageTooLong => {
                trace.record_stage("L0", ms_since(stage_start), StageVerdict::Blocked);
                trace.mark_blocked("L0", "size");
                return StageFlow::refused(ErrorCode::InputTooLong);
            }
            GatewayOutcome::MissingMessage => {
                trace.record_stage("L0", ms_since(stage_start), StageVerdict::Blocked);
                trace.mark_blocked("L0", "missing_message");
                return StageFlow::refused(ErrorCode::InternalError);
            }
        }

        // ── L1: sanitization ────────────────────────────────────────────
        let stage_start = Instant::now();
        let sanitized = match self.sanitizer.sanitize(&request.message) {
            SanitizeOutcome::Passed { sanitized, .. } => {
                trace.record_stage("L1", ms_since(stage_start), StageVerdict::Passed);
                sanitized
            }
            SanitizeOutcome::Blocked { reason } => {
                trace.record_stage("L1", ms_since(stage_start), StageVerdict::Blocked);
                trace.mark_blocked("L1", reason);
                return StageFlow::refused(ErrorCode::BlockedInput);
            }
            SanitizeOutcome::TooLong { .. } => {
                trace.record_stage("L1", ms_since(stage_start), StageVerdict::Blocked);
                trace.mark_blocked("L1", "too_long");
                return StageFlow::refused(ErrorCode::InputTooLong);
            }
            SanitizeOutcome::Empty => {
                trace.record_stage("L1", ms_since(stage_start), StageVerdict::Blocked);
                trace.mark_blocked("L1", "empty");
                return StageFlow::refused(ErrorCode::InternalError);
            }
        };

        // The conversation is resolved after the cheap gates so refused
        // spam cannot mint conversations.
        let conversation = self
            .conversations
            .get_or_create(request.conversation_id.as_deref())
            .await;
        let conversation_id = conversation.id.clone();

        // ── L2: jailbreak classifier ────────────────────────────────────
        let stage_start = Instant::now();
        let Some(_permit) = self.enter_gate(deadline).await else {
            trace.record_stage("L2", ms_since(stage_start), StageVerdict::Error);
            trace.mark_blocked("L2", "gate");
            return StageFlow::refused_in(ErrorCode::RateLimited, conversation_id);
        };
        let verdict = match tokio::time::timeout(
            stage_budget(deadline, self.classifier_timeout),
            self.jailbreak.classify(&sanitized, &conversation),
        )
        .await
        {
            Ok(verdict) => verdict,
            Err(_) => {
                // Stage deadline expired: unverifiable input fails closed.
                trace.record_stage("L2", ms_since(stage_start), StageVerdict::Blocked);
                trace.mark_blocked("L2", "timeout");
                return StageFlow::refused_in(ErrorCode::BlockedInput, conversation_id);
            }
        };
        match verdict {
            crate::pipeline::jailbreak::JailbreakOutcome::Safe { call, .. } => {
                trace.record_model_call(call);
                trace.record_stage("L2", ms_since(stage_start), StageVerdict::Passed);
            }
            crate::pipeline::jailbreak::JailbreakOutcome::Blocked { reason, call, .. } => {
                if let Some(call) = call {
                    trace.record_model_call(call);
                }
                trace.record_stage("L2", ms_since(stage_start), StageVerdict::Blocked);
                trace.mark_blocked("L2", reason);
                return StageFlow::refused_in(ErrorCode::BlockedInput, conversation_id);
            }
        }
        drop(_permit);

        // ── L3: intent parsing ──────────────────────────────────────────
        let stage_start = Instant::now();
        let Some(_permit) = self.enter_gate(deadline).await else {
            trace.record_stage("L3", ms_since(stage_start), StageVerdict::Error);
            trace.mark_blocked("L3", "gate");
            return StageFlow::refused_in(ErrorCode::RateLimited, conversation_id);
        };
        let parsed = match tokio::time::timeout(
            stage_budget(deadline, self.classifier_timeout),
            self.intent.parse(&sanitized),
        )
        .await
        {
            Ok(parsed) => parsed,
            // Intent parsing degrades instead of refusing; routing decides.
            Err(_) => crate::pipeline::intent::IntentOutcome {
                intent: Intent::fallback(),
                call: None,
            },
        };
        drop(_permit);
        if let Some(call) = parsed.call {
            trace.record_model_call(call);
        }
        trace.record_stage("L3", ms_since(stage_start), StageVerdict::Passed);
        let intent = parsed.intent;

        // ── L4: domain routing ──────────────────────────────────────────
        let stage_start = Instant::now();
        let routed = route::route(&intent);
        if routed.out_of_scope() {
            trace.record_stage("L4", ms_since(stage_start), StageVerdict::Blocked);
            trace.mark_blocked("L4", "out_of_scope");
            return StageFlow::refused_in(ErrorCode::OutOfScope, conversation_id);
        }
        trace.record_stage("L4", ms_since(stage_start), StageVerdict::Passed);
        let domain = routed.domain;
        trace.domain = Some(domain.as_str().to_string());

        // ── L5: context retrieval ───────────────────────────────────────
        let stage_start = Instant::now();
        let context = self.registry.retrieve(domain);
        trace.record_stage("L5", ms_since(stage_start), StageVerdict::Passed);

        // ── L6: generation with tool loop ───────────────────────────────
        let stage_start = Instant::now();
        let draft = match self
            .generate(
                &sanitized,
                domain,
                &context.text,
                &conversation,
                &request.ip_hash,
                deadline,
                None,
                trace,
            )
            .await
        {
            Ok(draft) => {
                trace.record_stage("L6", ms_since(stage_start), StageVerdict::Passed);
                draft
            }
            Err(code) => {
                trace.record_stage("L6", ms_since(stage_start), StageVerdict::Error);
                trace.mark_blocked("L6", "generation_failed");
                return StageFlow::refused_in(code, conversation_id);
            }
        };

        // ── L7: revision (advisory) ─────────────────────────────────────
        let stage_start = Instant::now();
        let revised = match self.enter_gate(deadline).await {
            Some(_permit) => {
                match tokio::time::timeout(
                    stage_budget(deadline, self.generator_timeout),
                    self.reviser.revise(draft, &context.text, &sanitized),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        trace.record_stage("L7", ms_since(stage_start), StageVerdict::Error);
                        trace.mark_blocked("L7", "timeout");
                        return StageFlow::refused_in(ErrorCode::InternalError, conversation_id);
                    }
                }
            }
            None => {
                trace.record_stage("L7", ms_since(stage_start), StageVerdict::Error);
                trace.mark_blocked("L7", "gate");
                return StageFlow::refused_in(ErrorCode::RateLimited, conversation_id);
            }
        };
        if let Some(call) = revised.call.clone() {
            trace.record_model_call(call);
        }
        let verdict = if revised.skipped {
            StageVerdict::Skipped
        } else {
            StageVerdict::Passed
        };
        trace.record_stage("L7", ms_since(stage_start), verdict);
        let mut final_text = revised.text;

        // ── L8: output safety, with one reinforced retry ────────────────
        let stage_start = Instant::now();
        let Some(_permit) = self.enter_gate(deadline).await else {
            trace.record_stage("L8", ms_since(stage_start), StageVerdict::Error);
            trace.mark_blocked("L8", "gate");
            return StageFlow::refused_in(ErrorCode::RateLimited, conversation_id);
        };
        let first_check = match tokio::time::timeout(
            stage_budget(deadline, self.classifier_timeout),
            self.safety.check(&final_text, &context.text),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => crate::pipeline::safety::SafetyOutcome {
                safe: false,
                issues: vec!["timeout".into()],
                calls: Vec::new(),
            },
        };
        drop(_permit);
        for call in first_check.calls.clone() {
            trace.record_model_call(call);
        }

        if !first_check.safe {
            // Single retry with a reinforced instruction naming the flagged
            // issues, then a second check. Still unsafe -> canned rephrase.
            let reinforcement = format!(
                "IMPORTANT: your previous answer was rejected by the safety check \
                 for: {}. Produce a corrected answer that avoids those issues.",
                if first_check.issues.is_empty() {
                    "unspecified issues".to_string()
                } else {
                    first_check.issues.join(", ")
                }
            );

            let retried = self
                .generate(
                    &sanitized,
                    domain,
                    &context.text,
                    &conversation,
                    &request.ip_hash,
                    deadline,
                    Some(&reinforcement),
                    trace,
                )
                .await;

            let recheck = match retried {
                Ok(text) => {
                    final_text = text;
                    let Some(_permit) = self.enter_gate(deadline).await else {
                        trace.record_stage("L8", ms_since(stage_start), StageVerdict::Blocked);
                        trace.mark_blocked("L8", "gate");
                        return StageFlow::refused_in(ErrorCode::RateLimited, conversation_id);
                    };
                    match tokio::time::timeout(
                        stage_budget(deadline, self.classifier_timeout),
                        self.safety.check(&final_text, &context.text),
                    )
                    .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => crate::pipeline::safety::SafetyOutcome {
                            safe: false,
                            issues: vec!["timeout".into()],
                            calls: Vec::new(),
                        },
                    }
                }
                Err(_) => crate::pipeline::safety::SafetyOutcome {
                    safe: false,
                    issues: first_check.issues.clone(),
                    calls: Vec::new(),
                },
            };
            for call in recheck.calls.clone() {
                trace.record_model_call(call);
            }

            if !recheck.safe {
                trace.record_stage("L8", ms_since(stage_start), StageVerdict::Blocked);
                trace.mark_blocked("L8", recheck.issues.join(","));
                return StageFlow::refused_in(ErrorCode::SafetyFailed, conversation_id);
            }
        }
        trace.record_stage("L8", ms_since(stage_start), StageVerdict::Passed);

        // ── L9: delivery -- atomic conversation append ──────────────────
        let stage_start = Instant::now();
        let response_time_ms = ms_since(started);
        let appended = self
            .conversations
            .append_exchange(
                &conversation_id,
                &sanitized,
                &final_text,
                domain,
                response_time_ms,
            )
            .await;
        if !appended {
            // The conversation expired mid-request; the response is still
            // valid, the next turn just starts a fresh conversation.
            info!(conversation_id = %conversation_id, "conversation gone at append time");
        }
        trace.record_stage("L9", ms_since(stage_start), StageVerdict::Passed);

        StageFlow::Success {
            content: final_text,
            domain,
            conversation_id,
        }
    }

    /// Run the generator under the gate with the remaining deadline.
    /// Returns the terminal code on failure.
    #[allow(clippy::too_many_arguments)]
    async fn generate(
        &self,
        message: &str,
        domain: Domain,
        context: &str,
        conversation: &ConversationSnapshot,
        ip_hash: &str,
        deadline: Instant,
        reinforcement: Option<&str>,
        trace: &mut RequestTrace,
    ) -> Result<String, ErrorCode> {
        let Some(_permit) = self.enter_gate(deadline).await else {
            return Err(ErrorCode::RateLimited);
        };

        let result = tokio::time::timeout(
            stage_budget(deadline, self.generator_timeout),
            self.generator
                .generate(message, domain, context, conversation, ip_hash, reinforcement),
        )
        .await;

        match result {
            Ok(Ok(outcome)) => {
                for call in outcome.calls {
                    trace.record_model_call(call);
                }
                Ok(outcome.text)
            }
            Ok(Err(err)) => {
                error!(%err, "generation failed");
                Err(ErrorCode::InternalError)
            }
            Err(_) => {
                error!("generation deadline exceeded");
                Err(ErrorCode::InternalError)
            }
        }
    }

    async fn enter_gate(&self, deadline: Instant) -> Option<tokio::sync::OwnedSemaphorePermit> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        self.gate.enter(remaining).await.ok()
    }

    fn meta(
        &self,
        request_id: &str,
        conversation_id: &str,
        started: Instant,
        trace: Option<&RequestTrace>,
    ) -> ResponseMeta {
        let layer_timings_ms = trace.map(|t| {
            t.stages
                .iter()
                .map(|s| (s.stage.to_string(), s.duration_ms))
                .collect::<BTreeMap<_, _>>()
        });
        ResponseMeta {
            request_id: request_id.to_string(),
            conversation_id: conversation_id.to_string(),
            response_time_ms: ms_since(started),
            layer_timings_ms,
        }
    }

    fn write_log(
        &self,
        request: &InboundRequest,
        request_id: &str,
        input_length: usize,
        started: Instant,
        trace: &RequestTrace,
    ) {
        let mut record =
            RequestRecord::now(request_id.to_string(), request.ip_hash.clone(), input_length);
        record.layers_passed = trace
            .stages
            .iter()
            .filter(|s| matches!(s.verdict, StageVerdict::Passed | StageVerdict::Skipped))
            .map(|s| s.stage.to_string())
            .collect();
        record.blocked_at_layer = trace.blocked_at.map(str::to_string);
        record.block_reason = trace.block_reason.clone();
        record.domain_matched = trace.domain.clone();
        record.response_time_ms = ms_since(started);
        record.model_calls = trace.model_calls.clone();
        self.reqlog.write(record);
    }
}

/// Control flow between the stage chain and the envelope assembly.
enum StageFlow {
    Success {
        content: String,
        domain: Domain,
        conversation_id: String,
    },
    Refused {
        code: ErrorCode,
        conversation_id: Option<String>,
    },
}

impl StageFlow {
    fn refused(code: ErrorCode) -> Self {
        Self::Refused {
            code,
            conversation_id: None,
        }
    }

    fn refused_in(code: ErrorCode, conversation_id: String) -> Self {
        Self::Refused {
            code,
            conversation_id: Some(conversation_id),
        }
    }
}

fn ms_since(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// A stage's time budget: its own bound, capped by what remains of the
/// whole-request deadline.
fn stage_budget(deadline: Instant, stage_bound: Duration) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .min(stage_bound)
}
