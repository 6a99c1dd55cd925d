//! Append-only request log.
//!
//! One JSONL record per request, written at delivery time on every path
//! (short-circuits included). The record schema carries no free-text fields:
//! the raw message, raw response, and raw ip cannot leak because the struct
//! has nowhere to put them. A bounded in-memory ring of recent records backs
//! the read-only analytics endpoints.

use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use gauntlet_types::{ModelCallRecord, Result};

/// How many records the analytics ring retains.
const RING_CAPACITY: usize = 1000;

/// One request's log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    pub request_id: String,
    pub client_ip_hash: String,
    /// Character count of the original message; the text itself is never
    /// logged.
    pub input_length: usize,
    pub layers_passed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_at_layer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_matched: Option<String>,
    pub response_time_ms: u64,
    pub model_calls: Vec<ModelCallRecord>,
}

impl RequestRecord {
    pub fn now(request_id: String, client_ip_hash: String, input_length: usize) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            request_id,
            client_ip_hash,
            input_length,
            layers_passed: Vec::new(),
            blocked_at_layer: None,
            block_reason: None,
            domain_matched: None,
            response_time_ms: 0,
            model_calls: Vec::new(),
        }
    }
}

struct Inner {
    file: Option<fs::File>,
    ring: VecDeque<RequestRecord>,
}

/// The request log sink.
pub struct RequestLog {
    inner: Mutex<Inner>,
}

impl RequestLog {
    /// Open the log file for appending, creating parent directories.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                file: Some(file),
                ring: VecDeque::new(),
            }),
        })
    }

    /// A log that only keeps the in-memory ring. Used in tests.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                file: None,
                ring: VecDeque::new(),
            }),
        }
    }

    /// Append a record. Failures are logged and swallowed -- the response
    /// must still go out.
    pub fn write(&self, record: RequestRecord) {
        let mut inner = self.inner.lock().unwrap();

        if let Some(file) = inner.file.as_mut() {
            match serde_json::to_string(&record) {
                Ok(mut line) => {
                    line.push('\n');
                    if let Err(err) = file.write_all(line.as_bytes()) {
                        warn!(%err, "request log write failed");
                    }
                }
                Err(err) => warn!(%err, "request record serialization failed"),
            }
        }

        if inner.ring.len() >= RING_CAPACITY {
            inner.ring.pop_front();
        }
        inner.ring.push_back(record);
    }

    /// Recent records, oldest first.
    pub fn recent(&self) -> Vec<RequestRecord> {
        self.inner.lock().unwrap().ring.iter().cloned().collect()
    }
}
