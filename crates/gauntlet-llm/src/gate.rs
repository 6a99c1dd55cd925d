//! Bounded concurrency gate around the model backend.
//!
//! The rate limiter is the primary backpressure mechanism; this gate is the
//! secondary one, capping in-flight model calls so a burst of admitted
//! requests cannot pile onto the GPU. Waiters share the overall request
//! deadline: if a permit cannot be obtained in time the caller maps the
//! failure to a rate-limited refusal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{BackendError, Result};

/// A semaphore-backed gate limiting concurrent model calls.
#[derive(Clone)]
pub struct BackendGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl BackendGate {
    /// Create a gate admitting at most `capacity` concurrent calls.
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Acquire a permit, waiting at most `deadline`.
    ///
    /// The permit is released when dropped, on every exit path.
    pub async fn enter(&self, deadline: Duration) -> Result<OwnedSemaphorePermit> {
        match tokio::time::timeout(deadline, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            // The semaphore is never closed while the gate is alive.
            Ok(Err(_)) => Err(BackendError::GateSaturated),
            Err(_) => Err(BackendError::GateSaturated),
        }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently available.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
