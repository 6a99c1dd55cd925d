//! Backend error types.
//!
//! All backend operations return [`Result<T>`] with [`BackendError`] as the
//! error type. Errors are split into transport failures (retryable) and
//! content failures (not retryable); [`BackendError::is_retryable`] encodes
//! the distinction for the retry wrapper.

use thiserror::Error;

/// Errors that can occur when talking to the model backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Could not reach the backend.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The call exceeded its deadline.
    #[error("backend call timed out")]
    Timeout,

    /// The backend rejected the request or the model failed to run.
    #[error("model error: {0}")]
    Model(String),

    /// The backend answered but the response was unusable.
    #[error("invalid response: {0}")]
    Response(String),

    /// A JSON-mode call produced output that failed strict parsing.
    #[error("model output is not valid JSON: {0}")]
    MalformedJson(String),

    /// The concurrency gate could not be entered before the deadline.
    #[error("backend gate saturated")]
    GateSaturated,

    /// HTTP-level error from the client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BackendError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Transport-level failures are retryable; content-level failures
    /// (model errors, malformed output) are not -- retrying them would just
    /// burn the request deadline.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout => true,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::Model(_) | Self::Response(_) | Self::MalformedJson(_) | Self::GateSaturated => {
                false
            }
        }
    }
}

/// Convenience alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;
