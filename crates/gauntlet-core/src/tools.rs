//! Tool-call parsing and execution.
//!
//! The generator may emit fenced `tool_call` blocks; the orchestrator
//! executes them through [`ToolExecutor`] and feeds the results back into
//! the generation loop. A single tool exists: `save_message_for_kellogg`.
//! Tool failures are results handed back to the model, never errors raised
//! through the pipeline.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::contact::ContactInbox;

/// Upper bound on a saved message body.
const MAX_MESSAGE_CHARS: usize = 4000;
/// Upper bound on a visitor name.
const MAX_NAME_CHARS: usize = 200;

static TOOL_CALL_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```tool_call\s*\n?\s*(\{.*?\})\s*\n?```").expect("tool fence pattern")
});

/// Permissive email shape check: something@something.something, no spaces.
static EMAIL_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern"));

/// A tool call parsed from generator output.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCall {
    /// A structurally valid call to a known tool.
    SaveMessage {
        message: String,
        visitor_name: Option<String>,
        visitor_email: Option<String>,
    },
    /// A fenced block naming a tool the gateway does not have.
    UnknownTool { name: String },
    /// A fenced block whose JSON did not parse or lacked the tool field.
    Malformed,
}

#[derive(Debug, Deserialize)]
struct RawCall {
    tool: Option<String>,
    message: Option<String>,
    visitor_name: Option<String>,
    visitor_email: Option<String>,
}

/// Whether the text contains any tool-call fences.
pub fn has_tool_calls(text: &str) -> bool {
    TOOL_CALL_FENCE.is_match(text)
}

/// Parse every fenced tool call in the text, in order.
pub fn parse_tool_calls(text: &str) -> Vec<ParsedCall> {
    TOOL_CALL_FENCE
        .captures_iter(text)
        .map(|cap| {
            let raw: RawCall = match serde_json::from_str(&cap[1]) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(%err, "unparseable tool call block");
                    return ParsedCall::Malformed;
                }
            };
            match raw.tool.as_deref() {
                Some("save_message_for_kellogg") => ParsedCall::SaveMessage {
                    message: raw.message.unwrap_or_default(),
                    visitor_name: raw.visitor_name,
                    visitor_email: raw.visitor_email,
                },
                Some(other) => ParsedCall::UnknownTool { name: other.into() },
                None => ParsedCall::Malformed,
            }
        })
        .collect()
}

/// Remove tool-call fences, leaving surrounding prose.
pub fn strip_tool_calls(text: &str) -> String {
    TOOL_CALL_FENCE.replace_all(text, "").trim().to_string()
}

/// Outcome of one tool execution, formatted for the model.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub ok: bool,
    /// The JSON result string handed back to the model.
    pub payload: String,
}

/// Executes parsed tool calls against the contact inbox.
pub struct ToolExecutor {
    inbox: Arc<ContactInbox>,
}

impl ToolExecutor {
    pub fn new(inbox: Arc<ContactInbox>) -> Self {
        Self { inbox }
    }

    /// Execute one parsed call. Validation failures and storage failures
    /// both come back as error payloads; nothing propagates.
    pub fn execute(
        &self,
        call: &ParsedCall,
        conversation_id: Option<&str>,
        conversation_excerpt: Option<String>,
        ip_hash: Option<&str>,
    ) -> ToolOutcome {
        match call {
            ParsedCall::SaveMessage {
                message,
                visitor_name,
                visitor_email,
            } => self.save_message(
                message,
                visitor_name.as_deref(),
                visitor_email.as_deref(),
                conversation_id,
                conversation_excerpt,
                ip_hash,
            ),
            ParsedCall::UnknownTool { name } => ToolOutcome {
                ok: false,
                payload: error_payload(&format!("unknown tool: {name}")),
            },
            ParsedCall::Malformed => ToolOutcome {
                ok: false,
                payload: error_payload("tool call was not valid JSON"),
            },
        }
    }

    fn save_message(
        &self,
        message: &str,
        visitor_name: Option<&str>,
        visitor_email: Option<&str>,
        conversation_id: Option<&str>,
        conversation_excerpt: Option<String>,
        ip_hash: Option<&str>,
    ) -> ToolOutcome {
        let message = message.trim();
        if message.is_empty() {
            return ToolOutcome {
                ok: false,
                payload: error_payload("message must not be empty"),
            };
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return ToolOutcome {
                ok: false,
                payload: error_payload("message too long"),
            };
        }
        if let Some(name) = visitor_name {
            if name.chars().count() > MAX_NAME_CHARS {
                return ToolOutcome {
                    ok: false,
                    payload: error_payload("visitor_name too long"),
                };
            }
        }
        if let Some(email) = visitor_email {
            if !EMAIL_SHAPE.is_match(email) {
                return ToolOutcome {
                    ok: false,
                    payload: error_payload("visitor_email is not a valid address"),
                };
            }
        }

        match self.inbox.store(
            message.to_string(),
            visitor_name.map(str::to_string),
            visitor_email.map(str::to_string),
            conversation_excerpt,
            conversation_id.map(str::to_string),
            ip_hash.map(str::to_string),
        ) {
            Ok(stored) => ToolOutcome {
                ok: true,
                payload: format!(r#"{{"status": "ok", "id": "{}"}}"#, stored.id),
            },
            Err(err) => {
                warn!(%err, "contact message store failed");
                ToolOutcome {
                    ok: false,
                    payload: error_payload("could not save the message"),
                }
            }
        }
    }
}

fn error_payload(reason: &str) -> String {
    serde_json::json!({"status": "error", "reason": reason}).to_string()
}
