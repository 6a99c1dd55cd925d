//! Append-only contact inbox.
//!
//! Visitor messages saved by the tool land here: one JSON file per message,
//! owner-read/write only, writes serialized behind a mutex. The read side
//! backs the admin inbox endpoints.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use gauntlet_types::{PipelineError, Result};

/// A persisted visitor message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactMessage {
    pub id: String,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_email: Option<String>,
    /// Excerpt of the surrounding conversation, at most the last two turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_hash: Option<String>,
}

/// File-backed inbox with serialized writes.
pub struct ContactInbox {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ContactInbox {
    /// Open (creating if needed) the inbox directory.
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Persist a new message and return the stored record.
    pub fn store(
        &self,
        message: String,
        sender_name: Option<String>,
        sender_email: Option<String>,
        context: Option<String>,
        conversation_id: Option<String>,
        ip_hash: Option<String>,
    ) -> Result<ContactMessage> {
        let now = Utc::now();
        let record = ContactMessage {
            id: Uuid::new_v4().simple().to_string()[..12].to_string(),
            timestamp: now.to_rfc3339(),
            message,
            sender_name,
            sender_email,
            context,
            conversation_id,
            ip_hash,
        };

        let filename = format!("{}_{}.json", now.format("%Y-%m-%d"), record.id);
        let path = self.dir.join(filename);
        let body = serde_json::to_vec_pretty(&record)?;

        {
            let _guard = self.write_lock.lock().unwrap();
            write_owner_only(&path, &body)?;
        }

        info!(id = %record.id, "stored contact message");
        Ok(record)
    }

    /// Most recent messages, newest first.
    pub fn list_recent(&self, limit: usize) -> Vec<ContactMessage> {
        let mut files: Vec<PathBuf> = match fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect(),
            Err(err) => {
                warn!(%err, "could not list contact inbox");
                return Vec::new();
            }
        };
        // Date-prefixed names sort chronologically.
        files.sort();
        files.reverse();

        files
            .into_iter()
            .take(limit)
            .filter_map(|path| {
                let raw = fs::read_to_string(&path).ok()?;
                match serde_json::from_str(&raw) {
                    Ok(msg) => Some(msg),
                    Err(err) => {
                        warn!(path = %path.display(), %err, "skipping unreadable contact file");
                        None
                    }
                }
            })
            .collect()
    }

    /// Look up a message by id.
    pub fn get(&self, id: &str) -> Option<ContactMessage> {
        // Ids are hex; reject anything that could escape the directory.
        if !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        let entries = fs::read_dir(&self.dir).ok()?;
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(&format!("_{id}.json")) {
                let raw = fs::read_to_string(entry.path()).ok()?;
                return serde_json::from_str(&raw).ok();
            }
        }
        None
    }

    /// Total stored messages.
    pub fn count(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                    .count()
            })
            .unwrap_or(0)
    }
}

/// Write a file readable and writable by the owner only.
#[cfg(unix)]
fn write_owner_only(path: &std::path::Path, body: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(PipelineError::Storage)?;
    file.write_all(body).map_err(PipelineError::Storage)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_owner_only(path: &std::path::Path, body: &[u8]) -> Result<()> {
    fs::write(path, body).map_err(PipelineError::Storage)
}
