//! Per-request trace records.
//!
//! Every request accumulates a [`RequestTrace`]: which stages ran, how long
//! they took, their verdicts, and the model calls they made. The trace is
//! written on every path, short-circuits included, and is the observable
//! surface the monotonicity and fail-closed properties are asserted against.

use serde::{Deserialize, Serialize};

/// How a stage concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageVerdict {
    /// The stage forwarded the request.
    Passed,
    /// The stage terminated the request with a refusal.
    Blocked,
    /// The stage failed internally (orchestrator maps this to a refusal).
    Error,
    /// The stage was intentionally skipped (e.g. revision of short drafts).
    Skipped,
}

/// One model invocation made during a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCallRecord {
    pub model: String,
    pub duration_ms: u64,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// One stage entry in the trace.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    /// Stage label, `"L0"` through `"L9"`.
    pub stage: &'static str,
    pub duration_ms: u64,
    pub verdict: StageVerdict,
}

/// The complete trace for one request. Serialized into diagnostics only;
/// never parsed back.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestTrace {
    pub stages: Vec<StageRecord>,
    pub model_calls: Vec<ModelCallRecord>,

    /// Stage label of the terminating stage, when the request was refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_at: Option<&'static str>,

    /// Short machine-readable reason for the block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,

    /// The domain the router resolved, once L4 has passed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl RequestTrace {
    /// Record a completed stage.
    pub fn record_stage(&mut self, stage: &'static str, duration_ms: u64, verdict: StageVerdict) {
        self.stages.push(StageRecord {
            stage,
            duration_ms,
            verdict,
        });
    }

    /// Record a model call made while a stage was running.
    pub fn record_model_call(&mut self, call: ModelCallRecord) {
        self.model_calls.push(call);
    }

    /// Mark the terminating stage and reason.
    pub fn mark_blocked(&mut self, stage: &'static str, reason: impl Into<String>) {
        self.blocked_at = Some(stage);
        self.block_reason = Some(reason.into());
    }

    /// Labels of stages that ran, in order.
    pub fn stages_run(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.stage).collect()
    }

    /// Whether a stage with the given label was entered.
    pub fn ran(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_ordering_preserved() {
        let mut trace = RequestTrace::default();
        trace.record_stage("L0", 1, StageVerdict::Passed);
        trace.record_stage("L1", 2, StageVerdict::Passed);
        trace.record_stage("L2", 30, StageVerdict::Blocked);
        assert_eq!(trace.stages_run(), vec!["L0", "L1", "L2"]);
        assert!(trace.ran("L1"));
        assert!(!trace.ran("L6"));
    }

    #[test]
    fn blocked_marking() {
        let mut trace = RequestTrace::default();
        trace.record_stage("L0", 1, StageVerdict::Passed);
        trace.record_stage("L1", 1, StageVerdict::Blocked);
        trace.mark_blocked("L1", "instruction_override");
        assert_eq!(trace.blocked_at, Some("L1"));
        assert_eq!(trace.block_reason.as_deref(), Some("instruction_override"));
    }

    #[test]
    fn model_calls_accumulate() {
        let mut trace = RequestTrace::default();
        trace.record_model_call(ModelCallRecord {
            model: "qwen2.5:0.5b".into(),
            duration_ms: 120,
            tokens_in: 200,
            tokens_out: 12,
        });
        trace.record_model_call(ModelCallRecord {
            model: "mistral:7b".into(),
            duration_ms: 2400,
            tokens_in: 1500,
            tokens_out: 300,
        });
        assert_eq!(trace.model_calls.len(), 2);
    }
}
