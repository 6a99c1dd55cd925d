//! Sliding-window rate limiter keyed by ip-hash.
//!
//! Three independent windows: per-ip per-minute, per-ip per-hour, and a
//! global per-minute window across all sources. Check and record happen in
//! one critical section so concurrent requests can never over-admit.
//!
//! Timestamps are `Instant`s appended monotonically per window; expired
//! entries are pruned on access, and ip entries with no live timestamps are
//! evicted during the periodic cleanup pass.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use gauntlet_types::config::RateLimits;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Which window, if any, rejected the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateVerdict {
    Allowed,
    /// Per-ip per-minute window full.
    IpMinute,
    /// Per-ip per-hour window full.
    IpHour,
    /// Global per-minute window full.
    Global,
}

impl RateVerdict {
    pub fn allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Short label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::IpMinute => "ip_minute",
            Self::IpHour => "ip_hour",
            Self::Global => "global",
        }
    }
}

/// Per-ip window state: request timestamps within the last hour, oldest
/// first.
#[derive(Default)]
struct IpWindow {
    timestamps: Vec<Instant>,
}

impl IpWindow {
    fn prune(&mut self, now: Instant) {
        self.timestamps.retain(|ts| now.duration_since(*ts) < HOUR);
    }

    fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.timestamps
            .iter()
            .filter(|ts| now.duration_since(**ts) < window)
            .count()
    }
}

struct Inner {
    ips: HashMap<String, IpWindow>,
    global: Vec<Instant>,
    last_cleanup: Instant,
}

/// The gateway's admission rate limiter.
pub struct RateLimiter {
    limits: RateLimits,
    inner: Mutex<Inner>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(Inner {
                ips: HashMap::new(),
                global: Vec::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Check all three windows and, if admitted, record the request in the
    /// same critical section.
    pub fn check_and_record(&self, ip_hash: &str) -> RateVerdict {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        if now.duration_since(inner.last_cleanup) > MINUTE {
            inner.last_cleanup = now;
            inner.global.retain(|ts| now.duration_since(*ts) < MINUTE);
            inner.ips.retain(|_, window| {
                window.prune(now);
                !window.timestamps.is_empty()
            });
        }

        let global_count = inner
            .global
            .iter()
            .filter(|ts| now.duration_since(**ts) < MINUTE)
            .count();

        let window = inner.ips.entry(ip_hash.to_string()).or_default();
        window.prune(now);

        if window.count_within(now, MINUTE) >= self.limits.per_ip_per_minute as usize {
            return RateVerdict::IpMinute;
        }
        if window.timestamps.len() >= self.limits.per_ip_per_hour as usize {
            return RateVerdict::IpHour;
        }
        if global_count >= self.limits.global_per_minute as usize {
            return RateVerdict::Global;
        }

        // Admitted: record against both the ip and global windows.
        window.timestamps.push(now);
        inner.global.push(now);

        RateVerdict::Allowed
    }

    /// Number of ip-hashes currently tracked.
    pub fn tracked_ips(&self) -> usize {
        self.inner.lock().unwrap().ips.len()
    }
}
