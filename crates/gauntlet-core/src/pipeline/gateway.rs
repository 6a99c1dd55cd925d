//! L0 -- network gateway.
//!
//! First line of defense, no content inspection: request envelope checks
//! (content type and declared size are enforced at the HTTP edge; the stage
//! re-checks what it can see) and the atomic three-window rate-limit
//! admission. Works entirely on the ip-hash; the raw ip never reaches the
//! pipeline.

use std::sync::Arc;

use crate::ratelimit::{RateLimiter, RateVerdict};

/// How L0 concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Passed,
    /// One of the rate windows rejected the source.
    RateLimited(RateVerdict),
    /// The declared body size exceeds the configured bound.
    RequestTooLarge,
    /// The message exceeds the character bound.
    MessageTooLong,
    /// No message at all.
    MissingMessage,
}

/// The L0 gateway stage.
pub struct Gateway {
    rate_limiter: Arc<RateLimiter>,
    max_request_size: usize,
    max_input_length: usize,
}

impl Gateway {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        max_request_size: usize,
        max_input_length: usize,
    ) -> Self {
        Self {
            rate_limiter,
            max_request_size,
            max_input_length,
        }
    }

    /// Validate the request envelope and admit it against the rate windows.
    ///
    /// Size checks run before the rate check so oversized requests are
    /// refused without consuming rate budget.
    pub fn admit(
        &self,
        ip_hash: &str,
        body_size: Option<usize>,
        message: &str,
    ) -> GatewayOutcome {
        if let Some(size) = body_size {
            if size > self.max_request_size {
                return GatewayOutcome::RequestTooLarge;
            }
        }
        if message.is_empty() {
            return GatewayOutcome::MissingMessage;
        }
        if message.chars().count() > self.max_input_length {
            return GatewayOutcome::MessageTooLong;
        }

        match self.rate_limiter.check_and_record(ip_hash) {
            RateVerdict::Allowed => GatewayOutcome::Passed,
            verdict => GatewayOutcome::RateLimited(verdict),
        }
    }
}
