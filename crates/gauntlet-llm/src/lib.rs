//! Model backend adapter for the gauntlet inference gateway.
//!
//! The pipeline never talks HTTP directly; it goes through the
//! [`ModelBackend`] trait. The crate provides:
//!
//! - [`OllamaBackend`] -- the native Ollama implementation (chat, JSON-mode
//!   chat, embeddings, health probe).
//! - [`RetryBackend`] -- a wrapper that retries exactly once on transport
//!   errors, never on content errors.
//! - [`BackendGate`] -- a bounded-concurrency gate protecting the model
//!   host from request bursts.
//! - [`json_guard`] -- fence stripping and strict parsing for JSON-mode
//!   responses; malformed output is a typed error, never fabricated content.

pub mod backend;
pub mod error;
pub mod gate;
pub mod json_guard;
pub mod ollama;
pub mod retry;

pub use backend::{ChatMessage, ChatOptions, ChatOutcome, ModelBackend};
pub use error::{BackendError, Result};
pub use gate::BackendGate;
pub use ollama::OllamaBackend;
pub use retry::RetryBackend;
