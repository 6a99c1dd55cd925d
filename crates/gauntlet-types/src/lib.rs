//! Shared data model for the gauntlet inference gateway.
//!
//! Everything that crosses a crate boundary lives here: the closed enums the
//! pipeline routes on, the `/chat` wire envelopes, per-request trace records,
//! terminal error codes with their canned user-facing messages, and the
//! grouped gateway configuration.

pub mod config;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod intent;
pub mod trace;

pub use config::GatewayConfig;
pub use domain::Domain;
pub use envelope::{ChatRequest, ChatResponse, ResponseMeta};
pub use error::{ErrorCode, PipelineError, Result};
pub use intent::{EmotionalTone, Intent, QuestionType, Topic};
pub use trace::{ModelCallRecord, RequestTrace, StageRecord, StageVerdict};
