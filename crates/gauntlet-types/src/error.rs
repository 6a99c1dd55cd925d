//! Error types for the gauntlet pipeline.
//!
//! [`ErrorCode`] is the closed set of terminal outcomes a request can end
//! with; each code maps to a fixed user-visible message that never
//! interpolates internal detail. [`PipelineError`] is the internal error type
//! stages propagate; only the orchestrator maps it to a user-visible shape.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal outcome codes for a refused or failed request.
///
/// One-to-one with the wire-level `error.code` field. Every code has a canned
/// message; internal detail (model names, stack info, prompt content) is
/// never surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimited,
    InputTooLong,
    BlockedInput,
    OutOfScope,
    SafetyFailed,
    InternalError,
}

impl ErrorCode {
    /// The wire representation (`RATE_LIMITED`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "RATE_LIMITED",
            Self::InputTooLong => "INPUT_TOO_LONG",
            Self::BlockedInput => "BLOCKED_INPUT",
            Self::OutOfScope => "OUT_OF_SCOPE",
            Self::SafetyFailed => "SAFETY_FAILED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// The fixed user-visible message for this code.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::RateLimited => "Please wait a moment before sending another message.",
            Self::InputTooLong => "Your message is a bit long. Could you shorten it?",
            Self::BlockedInput => {
                "I can only answer questions about Kellogg's professional background and projects."
            }
            Self::OutOfScope => {
                "I'm designed to answer questions about Kellogg's work and projects. \
                 For other topics, I'd recommend a general AI assistant."
            }
            Self::SafetyFailed => {
                "Let me try again. I'd be happy to discuss my professional background \
                 and projects. What would you like to know?"
            }
            Self::InternalError => {
                "I'm having some technical difficulties. Please try again in a moment."
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal error type propagated between pipeline components.
///
/// Stages return either a forwarded request or a terminal verdict; errors in
/// this enum are the "something actually broke" cases. The orchestrator is
/// the only component that maps these to [`ErrorCode::InternalError`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    /// The model backend failed in a way the stage could not absorb.
    #[error("backend failure: {0}")]
    Backend(String),

    /// A stage exceeded its deadline.
    #[error("stage deadline exceeded: {stage}")]
    StageTimeout {
        /// The stage that ran out of budget.
        stage: &'static str,
    },

    /// The whole-request deadline expired.
    #[error("request deadline exceeded")]
    RequestTimeout,

    /// Persisting a side effect (contact message, log record) failed.
    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),

    /// JSON serialization of an internal record failed.
    #[error("serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Invalid gateway configuration detected at startup.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PipelineError>;
