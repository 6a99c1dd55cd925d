//! Wire envelopes for the `/chat` endpoint.
//!
//! HTTP status is 200 for both success and expected refusals; the body
//! carries the verdict. 4xx is reserved for malformed transport and 5xx for
//! true internal failure of the handler itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Inbound `/chat` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The visitor's message. Length is enforced by the gateway stage, not
    /// by deserialization, so oversized input yields the proper refusal code.
    pub message: String,

    /// Opaque conversation id for multi-turn sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Successful response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseBody {
    /// The generated answer.
    pub content: String,
    /// The domain the answer was grounded in.
    pub domain: String,
}

/// Error payload for refused or failed requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// One of the closed error codes.
    pub code: String,
    /// The canned user-visible message for the code.
    pub message: String,
}

/// Metadata attached to every response, success or refusal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub conversation_id: String,
    pub response_time_ms: u64,
    /// Per-stage timings; omitted on short-circuited refusals where only a
    /// prefix of stages ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_timings_ms: Option<BTreeMap<String, u64>>,
}

/// The full `/chat` response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseBody>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,

    pub metadata: ResponseMeta,
}

impl ChatResponse {
    /// Build a success envelope.
    pub fn ok(content: String, domain: &str, meta: ResponseMeta) -> Self {
        Self {
            success: true,
            response: Some(ResponseBody {
                content,
                domain: domain.to_string(),
            }),
            error: None,
            metadata: meta,
        }
    }

    /// Build a refusal/failure envelope with the code's canned message.
    pub fn refusal(code: ErrorCode, meta: ResponseMeta) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(ErrorBody {
                code: code.as_str().to_string(),
                message: code.user_message().to_string(),
            }),
            metadata: meta,
        }
    }

    /// The error code carried by a refusal envelope, if any.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}
